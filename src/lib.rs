pub mod config;
pub mod console;
pub mod db;
pub mod experiment;
pub mod ledger;
pub mod settings;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};

use config::AppConfig;
use console::Console;
use db::Database;
use experiment::ExperimentController;
use ledger::ScanLedger;
use settings::SettingsStore;

/// Services shared by every operator surface. Created once per process.
#[derive(Clone)]
pub struct AppState {
    pub ledger: ScanLedger,
    pub experiment: ExperimentController,
    pub settings: Arc<SettingsStore>,
}

impl AppState {
    pub fn open(config: &AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!(
                "failed to create data directory {}",
                config.data_dir.display()
            )
        })?;

        let database = Database::new(config.db_path())?;
        let settings = Arc::new(SettingsStore::new(config.settings_path())?);

        Ok(Self {
            ledger: ScanLedger::new(database, config.export_dir.clone()),
            experiment: ExperimentController::new(settings.clone()),
            settings,
        })
    }

    /// Completes the running experiment and stores its scans. Returns how
    /// many were saved; zero when nothing was recorded.
    pub async fn complete_and_save(&self) -> Result<usize> {
        let scans = self.experiment.complete_experiment();
        if scans.is_empty() {
            return Ok(0);
        }

        if let Err(err) = self.ledger.save_scans(&scans).await {
            warn!("{} scans from the completed experiment were not saved", scans.len());
            return Err(err);
        }
        self.experiment.trigger_statistics_refresh();
        Ok(scans.len())
    }

    pub async fn delete_all_data(&self) -> Result<()> {
        self.ledger.delete_all_data().await?;
        self.experiment.trigger_statistics_refresh();
        Ok(())
    }
}

pub fn run() {
    let config = AppConfig::from_env();

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(if config.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    info!("ScanLab starting up...");

    let result = (|| -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build async runtime")?;

        runtime.block_on(async {
            let state = AppState::open(&config)?;
            info!(
                "Settings at {}, exports to {}",
                state.settings.path().display(),
                config.export_dir.display()
            );
            Console::new(state).run().await
        })
    })();

    if let Err(err) = result {
        error!("ScanLab stopped: {err:#}");
        std::process::exit(1);
    }
}
