//! Geometry loader orchestration with stall recovery
//!
//! Drives the adapter through up to `max_restarts` attempts: a stalled load
//! is retried with a halved transaction group size, anything else propagates
//! immediately. Output lines of each attempt flow through a fresh
//! [`LogCollector`], which aggregates warnings by message and counts
//! skipped-invalid features instead of logging each one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::adapter::{
    mask_conn_str, pg_conn_str, resolve_binary, LoaderCommand, LoaderInvocation, Ogr2OgrCommand,
};
use super::{classify, plan, BulkError, LineClass};
use crate::config::LoaderConfig;

/// Outcome of one successful bulk load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Group size of the attempt that succeeded.
    pub group_size: u32,
    /// Stall restarts consumed before success.
    pub restarts: u32,
    pub skipped_features: u64,
    pub warnings: u64,
}

pub struct GeometryLoader {
    config: LoaderConfig,
    binary: PathBuf,
    conn_str: String,
    command: Arc<dyn LoaderCommand>,
}

impl GeometryLoader {
    /// Resolve the loader binary and build the real adapter.
    pub async fn new(config: LoaderConfig, database_url: &str) -> anyhow::Result<Self> {
        let binary = resolve_binary(&config).await?;
        let conn_str = pg_conn_str(database_url)?;
        Ok(Self {
            config,
            binary,
            conn_str,
            command: Arc::new(Ogr2OgrCommand),
        })
    }

    /// Build a loader over an arbitrary adapter. Used by tests to script
    /// stall sequences without a subprocess.
    pub fn with_command(
        config: LoaderConfig,
        binary: PathBuf,
        conn_str: String,
        command: Arc<dyn LoaderCommand>,
    ) -> Self {
        Self {
            config,
            binary,
            conn_str,
            command,
        }
    }

    /// Load one shapefile into `landwatch.stg_raw`.
    ///
    /// The caller must have dropped the staging table and committed before
    /// calling; the loader runs `-overwrite` against a clean slate.
    pub async fn load(
        &self,
        shp_path: &Path,
        file_size_bytes: u64,
    ) -> Result<LoadReport, BulkError> {
        let mut group_size = plan::group_size_for(&self.config, file_size_bytes);
        let max_restarts = self.config.max_restarts;
        let mut restarts = 0u32;

        info!(
            shapefile = %shp_path.display(),
            file_size_bytes,
            group_size,
            "Starting bulk geometry load"
        );

        loop {
            let invocation = self.build_invocation(shp_path, group_size);
            debug!(
                cmd = %mask_conn_str(&format!(
                    "{} {}",
                    invocation.program.display(),
                    invocation.args.join(" ")
                )),
                "Invoking loader"
            );

            let mut collector = LogCollector::new();
            let result = self
                .command
                .run(&invocation, &mut |line| collector.observe(line))
                .await;

            match result {
                Ok(()) => {
                    let report = collector.summarize(group_size, restarts);
                    self.write_skip_log(shp_path, &collector).await;
                    return Ok(report);
                },
                Err(BulkError::Stalled { .. }) if restarts < max_restarts => {
                    restarts += 1;
                    group_size = plan::halved(&self.config, group_size);
                    warn!(
                        restarts,
                        max_restarts, group_size, "Loader stalled, restarting with smaller group size"
                    );
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn build_invocation(&self, shp_path: &Path, group_size: u32) -> LoaderInvocation {
        let mut args: Vec<String> = vec![
            "-overwrite".into(),
            "-f".into(),
            "PostgreSQL".into(),
            self.conn_str.clone(),
            shp_path.display().to_string(),
            "-nln".into(),
            "landwatch.stg_raw".into(),
            "-lco".into(),
            "GEOMETRY_NAME=geom".into(),
            "-lco".into(),
            "FID=row_id".into(),
            "-progress".into(),
            "-oo".into(),
            format!("ENCODING={}", self.config.encoding),
            "-nlt".into(),
            self.config.geometry_type.clone(),
        ];
        if self.config.use_copy {
            args.extend(["--config".into(), "PG_USE_COPY".into(), "YES".into()]);
        }
        if !self.config.enable_metadata {
            args.extend([
                "--config".into(),
                "OGR_PG_ENABLE_METADATA".into(),
                "NO".into(),
            ]);
        }
        if self.config.disable_spatial_index {
            args.extend(["-lco".into(), "SPATIAL_INDEX=NONE".into()]);
        }
        args.extend(["-lco".into(), "PRECISION=NO".into()]);
        if self.config.make_valid {
            args.push("-makevalid".into());
        }
        if self.config.skip_invalid {
            args.push("-skipinvalid".into());
        }
        if group_size > 0 {
            args.extend(["-gt".into(), group_size.to_string()]);
        }

        let mut env = Vec::new();
        if let Some(gdal_data) = &self.config.gdal_data {
            env.push(("GDAL_DATA".to_string(), gdal_data.clone()));
        }
        if let Some(proj_lib) = &self.config.proj_lib {
            env.push(("PROJ_LIB".to_string(), proj_lib.clone()));
        }

        LoaderInvocation {
            program: self.binary.clone(),
            args,
            env,
            stall_secs: self.config.stall_secs,
            heartbeat_secs: self.config.heartbeat_secs,
            timeout_secs: self.config.timeout_secs,
        }
    }

    fn skip_log_path(&self, shp_path: &Path) -> Option<PathBuf> {
        let dir = self.config.log_dir.as_ref()?;
        let stem = shp_path.file_stem()?.to_string_lossy();
        let mut safe = String::with_capacity(stem.len());
        let mut last_was_sep = false;
        for c in stem.chars() {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                safe.push(c);
                last_was_sep = false;
            } else if !last_was_sep {
                safe.push('_');
                last_was_sep = true;
            }
        }
        Some(dir.join(format!("ogr2ogr_skipinvalid_{safe}.txt")))
    }

    async fn write_skip_log(&self, shp_path: &Path, collector: &LogCollector) {
        if collector.skipped_count == 0 {
            return;
        }
        let Some(path) = self.skip_log_path(shp_path) else {
            return;
        };
        let mut body = format!("Skipped features: {}\n", collector.skipped_count);
        for line in &collector.skipped_lines {
            body.push_str(line);
            body.push('\n');
        }
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, "Could not create skip-log directory");
                return;
            }
        }
        match tokio::fs::write(&path, body).await {
            Ok(()) => info!(path = %path.display(), "Wrote skipped-feature log"),
            Err(e) => warn!(error = %e, "Could not write skipped-feature log"),
        }
    }
}

/// Single-consumer aggregator for one attempt's output lines.
struct LogCollector {
    warning_counts: BTreeMap<String, u64>,
    warning_total: u64,
    skipped_lines: Vec<String>,
    skipped_count: u64,
}

impl LogCollector {
    fn new() -> Self {
        Self {
            warning_counts: BTreeMap::new(),
            warning_total: 0,
            skipped_lines: Vec::new(),
            skipped_count: 0,
        }
    }

    fn observe(&mut self, line: &str) {
        match classify::classify_line(line) {
            LineClass::Fatal => error!("[ogr2ogr] {line}"),
            LineClass::Warning(text) => {
                self.warning_total += 1;
                *self.warning_counts.entry(text).or_insert(0) += 1;
            },
            LineClass::SkippedInvalid => {
                self.skipped_count += 1;
                self.skipped_lines.push(line.to_string());
            },
            LineClass::Benign => {},
            LineClass::Trace => debug!("[ogr2ogr] {line}"),
        }
    }

    fn summarize(&self, group_size: u32, restarts: u32) -> LoadReport {
        if self.warning_total > 0 {
            let mut items: Vec<(&String, &u64)> = self.warning_counts.iter().collect();
            items.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            let summary = items
                .iter()
                .map(|(text, count)| format!("{text}={count}"))
                .collect::<Vec<_>>()
                .join(", ");
            warn!(total = self.warning_total, "Loader warnings: {summary}");
        }
        if self.skipped_count > 0 {
            warn!(
                skipped = self.skipped_count,
                "Loader skipped invalid features"
            );
        }
        LoadReport {
            group_size,
            restarts,
            skipped_features: self.skipped_count,
            warnings: self.warning_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Outcome {
        Stall,
        Succeed(Vec<&'static str>),
        Fail(i32),
    }

    /// Scripted adapter: pops one outcome per attempt, recording the
    /// `-gt` group size each invocation carried.
    struct ScriptedCommand {
        outcomes: Mutex<Vec<Outcome>>,
        group_sizes: Mutex<Vec<u32>>,
    }

    impl ScriptedCommand {
        fn new(outcomes: Vec<Outcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                group_sizes: Mutex::new(Vec::new()),
            }
        }

        fn seen_group_sizes(&self) -> Vec<u32> {
            self.group_sizes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LoaderCommand for ScriptedCommand {
        async fn run(
            &self,
            invocation: &LoaderInvocation,
            on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> Result<(), BulkError> {
            let gt = invocation
                .args
                .iter()
                .position(|a| a == "-gt")
                .and_then(|i| invocation.args.get(i + 1))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            self.group_sizes.lock().unwrap().push(gt);

            match self.outcomes.lock().unwrap().remove(0) {
                Outcome::Stall => Err(BulkError::Stalled {
                    stalled_secs: 900,
                    elapsed_secs: 1000,
                }),
                Outcome::Succeed(lines) => {
                    for line in lines {
                        on_line(line);
                    }
                    Ok(())
                },
                Outcome::Fail(code) => Err(BulkError::Exit(code)),
            }
        }
    }

    fn loader_with(script: Vec<Outcome>) -> (GeometryLoader, Arc<ScriptedCommand>) {
        let command = Arc::new(ScriptedCommand::new(script));
        let config = LoaderConfig {
            log_dir: None,
            ..LoaderConfig::default()
        };
        let loader = GeometryLoader::with_command(
            config,
            PathBuf::from("ogr2ogr"),
            "PG:host=h port=5432 dbname=d user=u password=p sslmode=require".to_string(),
            command.clone(),
        );
        (loader, command)
    }

    #[tokio::test]
    async fn test_restart_with_shrink_after_stalls() {
        let (loader, command) = loader_with(vec![
            Outcome::Stall,
            Outcome::Stall,
            Outcome::Succeed(vec![]),
        ]);

        let report = loader.load(Path::new("parcels.shp"), 100).await.unwrap();
        assert_eq!(report.restarts, 2);
        assert_eq!(report.group_size, 16_384);
        assert_eq!(command.seen_group_sizes(), vec![65_536, 32_768, 16_384]);
    }

    #[tokio::test]
    async fn test_stall_propagates_after_restart_cap() {
        let (loader, command) =
            loader_with(vec![Outcome::Stall, Outcome::Stall, Outcome::Stall]);

        let err = loader.load(Path::new("parcels.shp"), 100).await.unwrap_err();
        assert!(matches!(err, BulkError::Stalled { .. }));
        // initial attempt + max_restarts retries
        assert_eq!(command.seen_group_sizes().len(), 3);
    }

    #[tokio::test]
    async fn test_exit_error_does_not_restart() {
        let (loader, command) = loader_with(vec![Outcome::Fail(3), Outcome::Succeed(vec![])]);

        let err = loader.load(Path::new("parcels.shp"), 100).await.unwrap_err();
        assert!(matches!(err, BulkError::Exit(3)));
        assert_eq!(command.seen_group_sizes().len(), 1);
    }

    #[tokio::test]
    async fn test_large_file_starts_at_lower_tier() {
        let (loader, command) = loader_with(vec![Outcome::Succeed(vec![])]);

        loader
            .load(Path::new("parcels.shp"), 3 * 1024 * 1024 * 1024)
            .await
            .unwrap();
        assert_eq!(command.seen_group_sizes(), vec![10_000]);
    }

    #[tokio::test]
    async fn test_report_counts_warnings_and_skips() {
        let (loader, _) = loader_with(vec![Outcome::Succeed(vec![
            "Warning 1: Ring Self-intersection at or near point 1 2",
            "Warning 1: Ring Self-intersection at or near point 3 4",
            "Warning 1: Value truncated",
            "Skipping feature 7 with invalid geometry",
            "0...10...20",
        ])]);

        let report = loader.load(Path::new("parcels.shp"), 100).await.unwrap();
        assert_eq!(report.warnings, 3);
        assert_eq!(report.skipped_features, 1);
    }
}
