use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use log::{info, warn};
use machine_learning::persistence::SavedModel;

use crate::error::{Result, WorkerErr};

/// How many consecutive timestamps are tried before giving up.
const MAX_ATTEMPTS: i64 = 10;

/// Exports `model` into a new `export_dir/<unix seconds>` directory.
///
/// When the directory for the current second already exists the following seconds are tried,
/// up to `MAX_ATTEMPTS` times.
///
/// # Returns
/// The directory the model was exported to.
pub fn export_saved_model(export_dir: &Path, model: &SavedModel) -> Result<PathBuf> {
    fs::create_dir_all(export_dir)?;
    let now = Utc::now().timestamp();

    for attempt in 0..MAX_ATTEMPTS {
        let dir = export_dir.join((now + attempt).to_string());

        match fs::create_dir(&dir) {
            Ok(()) => {
                if let Err(e) = model.export(&dir) {
                    if let Err(rm) = fs::remove_dir_all(&dir) {
                        warn!("failed to remove the partial export {}: {rm}", dir.display());
                    }
                    return Err(e.into());
                }

                info!("exported the model to {}", dir.display());
                return Ok(dir);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!("export directory {} already exists", dir.display());
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(WorkerErr::Export(format!(
        "no free timestamp directory in {} after {MAX_ATTEMPTS} attempts",
        export_dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use comms::specs::machine_learning::LossFnSpec;
    use machine_learning::{
        arch::{
            Sequential,
            layers::{Dense, Layer},
        },
        persistence::{MODEL_FILE, WEIGHTS_FILE},
    };

    use super::*;

    fn saved_model() -> SavedModel {
        let model = Sequential::new([Layer::Dense(Dense::new((2, 2), None))]);
        SavedModel::new(model, vec![0.5; 6], LossFnSpec::SparseCategoricalCrossEntropy)
    }

    #[test]
    fn export_lands_in_a_timestamp_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = export_saved_model(dir.path(), &saved_model()).unwrap();

        assert_eq!(path.parent(), Some(dir.path()));
        assert!(path.file_name().unwrap().to_string_lossy().parse::<i64>().is_ok());
        assert!(path.join(MODEL_FILE).is_file());
        assert!(path.join(WEIGHTS_FILE).is_file());
    }

    #[test]
    fn taken_timestamps_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let model = saved_model();

        let first = export_saved_model(dir.path(), &model).unwrap();
        let second = export_saved_model(dir.path(), &model).unwrap();
        assert_ne!(first, second);

        let loaded = SavedModel::load(&second).unwrap();
        assert_eq!(loaded.params(), model.params());
    }

    #[test]
    fn failed_export_leaves_no_directory_behind() {
        let dir = tempfile::tempdir().unwrap();
        let model = Sequential::new([Layer::Dense(Dense::new((2, 2), None))]);
        let broken = SavedModel::new(model, vec![0.5; 3], LossFnSpec::SparseCategoricalCrossEntropy);

        assert!(matches!(
            export_saved_model(dir.path(), &broken),
            Err(WorkerErr::Ml(_))
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn gives_up_when_every_timestamp_is_taken() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now().timestamp();
        for ts in now..now + MAX_ATTEMPTS + 2 {
            fs::create_dir(dir.path().join(ts.to_string())).unwrap();
        }

        assert!(matches!(
            export_saved_model(dir.path(), &saved_model()),
            Err(WorkerErr::Export(_))
        ));
    }
}
