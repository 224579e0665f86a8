use std::io;

use clap::Parser;
use launcher::{Args, Cluster};
use log::info;

fn main() -> io::Result<()> {
    env_logger::init();

    let args = Args::parse();
    info!("args: {args:?}");

    let cluster = Cluster::run(&args)?;
    info!("training on {} worker(s)", cluster.size());

    let reports = cluster.shutdown()?;
    let Some(chief) = reports.first() else {
        return Ok(());
    };

    for stats in &chief.epochs {
        info!(
            "epoch {}: loss {:.4} accuracy {:.4}",
            stats.epoch, stats.loss, stats.accuracy
        );
    }

    if let Some(dir) = &chief.export_dir {
        info!("model exported to {}", dir.display());
    }

    Ok(())
}
