//! Transaction group sizing
//!
//! The loader commits in groups of rows (`-gt`). Bigger groups are faster but
//! large files with heavy geometries make the server-side work per group
//! balloon, so the starting size steps down at the large and extra-large
//! byte thresholds. Stall restarts then halve from wherever they are.

use crate::config::LoaderConfig;

/// Starting group size for a source file of the given byte size.
pub fn group_size_for(config: &LoaderConfig, file_size_bytes: u64) -> u32 {
    if file_size_bytes == 0 {
        return config.group_size;
    }
    if file_size_bytes >= config.xl_bytes {
        return config.group_size_xl;
    }
    if file_size_bytes >= config.large_bytes {
        return config.group_size_large;
    }
    config.group_size
}

/// Halve the group size, never dropping below the configured floor.
pub fn halved(config: &LoaderConfig, current: u32) -> u32 {
    if current == 0 {
        return config.group_size_min;
    }
    (current / 2).max(config.group_size_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_selection() {
        let config = LoaderConfig::default();
        assert_eq!(group_size_for(&config, 0), 65_536);
        assert_eq!(group_size_for(&config, 500 * 1024 * 1024), 65_536);
        assert_eq!(group_size_for(&config, 1024 * 1024 * 1024), 20_000);
        assert_eq!(group_size_for(&config, 2 * 1024 * 1024 * 1024), 10_000);
        assert_eq!(group_size_for(&config, 10 * 1024 * 1024 * 1024), 10_000);
    }

    #[test]
    fn test_halving_respects_floor() {
        let config = LoaderConfig::default();
        assert_eq!(halved(&config, 20_000), 10_000);
        assert_eq!(halved(&config, 10_000), 5_000);
        assert_eq!(halved(&config, 5_000), 2_500);
        assert_eq!(halved(&config, 2_500), 2_000);
        assert_eq!(halved(&config, 2_000), 2_000);
        assert_eq!(halved(&config, 0), 2_000);
    }
}
