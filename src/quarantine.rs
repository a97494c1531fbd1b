//! Post-processing relocation of study folders into the dated `processed`
//! or `failed` trees, and the error record written alongside a quarantined
//! folder.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use serde::Serialize;

/// One instance-level failure, as recorded in an [ErrorRecord].
#[derive(Debug, Serialize)]
pub struct InstanceFailure {
    pub file: String,
    pub error: String,
}

/// The machine-readable record written as `{study}.error.json` alongside a
/// quarantined (failed or errored) study folder.
#[derive(Debug, Serialize)]
pub struct ErrorRecord {
    pub timestamp: chrono::DateTime<Local>,
    pub study_folder: String,
    pub clinic_id: String,
    pub reason: String,
    pub errors: Vec<InstanceFailure>,
}

impl ErrorRecord {
    pub fn new(study_folder: &str, clinic_id: &str, reason: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            study_folder: study_folder.to_string(),
            clinic_id: clinic_id.to_string(),
            reason: reason.into(),
            errors: Vec::new(),
        }
    }
}

/// Compute `{root}/{tenant}/{YYYY-MM-DD}/{study_basename}`, appending
/// `_{HHMMSS}` to the basename if that path already exists.
pub fn destination_path(root: &Utf8Path, tenant: &str, study: &Utf8Path) -> Utf8PathBuf {
    let now = Local::now();
    let day_dir = root.join(tenant).join(now.format("%Y-%m-%d").to_string());
    let basename = study
        .file_name()
        .expect("study path must have a basename");

    let candidate = day_dir.join(basename);
    if !candidate.exists() {
        return candidate;
    }
    day_dir.join(format!("{basename}_{}", now.format("%H%M%S")))
}

/// Move `study` to `destination`, creating parent directories first.
///
/// Uses a rename where possible, falling back to a recursive copy-then-delete
/// when `study` and `destination` are not on the same filesystem.
pub fn move_study(study: &Utf8Path, destination: &Utf8Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs_err::create_dir_all(parent)?;
    }
    match fs_err::rename(study, destination) {
        Ok(()) => Ok(()),
        Err(_) => copy_dir_recursive(study, destination).and_then(|()| fs_err::remove_dir_all(study)),
    }
}

fn copy_dir_recursive(src: &Utf8Path, dest: &Utf8Path) -> std::io::Result<()> {
    fs_err::create_dir_all(dest)?;
    for entry in fs_err::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let entry_path = Utf8PathBuf::from_path_buf(entry.path())
            .expect("directory entry path is not valid UTF-8");
        let dest_path = dest.join(entry_path.file_name().expect("entry has a basename"));
        if file_type.is_dir() {
            copy_dir_recursive(&entry_path, &dest_path)?;
        } else {
            fs_err::copy(&entry_path, &dest_path)?;
        }
    }
    Ok(())
}

/// Write `record` as `{destination}.error.json`, a sibling of the moved
/// study folder.
pub fn write_error_record(destination: &Utf8Path, record: &ErrorRecord) -> std::io::Result<()> {
    let path = error_record_path(destination);
    let json = serde_json::to_vec_pretty(record)
        .expect("ErrorRecord serialization cannot fail");
    fs_err::write(path, json)
}

pub fn error_record_path(destination: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{destination}.error.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn utf8(p: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(p.to_path_buf()).unwrap()
    }

    #[test]
    fn test_destination_path_has_no_collision_on_first_use() {
        let dir = tempdir().unwrap();
        let root = utf8(dir.path());
        let study = root.join("study-001");
        std::fs::create_dir_all(&study).unwrap();

        let dest = destination_path(&root, "clinicA", &study);
        assert_eq!(dest.file_name().unwrap(), "study-001");
        assert!(dest.as_str().contains("clinicA"));
    }

    #[test]
    fn test_destination_path_appends_suffix_on_collision() {
        let dir = tempdir().unwrap();
        let root = utf8(dir.path());
        let study = root.join("study-001");
        std::fs::create_dir_all(&study).unwrap();

        let first = destination_path(&root, "clinicA", &study);
        std::fs::create_dir_all(&first).unwrap();

        let second = destination_path(&root, "clinicA", &study);
        assert_ne!(first, second);
        assert!(second.file_name().unwrap().starts_with("study-001_"));
    }

    #[test]
    fn test_move_study_relocates_contents() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("inbox").join("study-001");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.dcm"), b"data").unwrap();

        let dest = dir.path().join("processed").join("clinicA").join("2026-07-27").join("study-001");
        move_study(&utf8(&src), &utf8(&dest)).unwrap();

        assert!(!src.exists());
        assert!(dest.join("a.dcm").exists());
    }

    #[test]
    fn test_write_error_record_sibling_path() {
        let dir = tempdir().unwrap();
        let dest = utf8(&dir.path().join("failed").join("clinicA").join("2026-07-27").join("study-001"));
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();

        let record = ErrorRecord::new("study-001", "clinicA", "No DICOM files found");
        write_error_record(&dest, &record).unwrap();

        let expected = dir
            .path()
            .join("failed")
            .join("clinicA")
            .join("2026-07-27")
            .join("study-001.error.json");
        assert!(expected.exists());

        let contents = std::fs::read_to_string(&expected).unwrap();
        assert!(contents.contains("No DICOM files found"));
        assert!(contents.contains("clinicA"));
    }

    #[test]
    fn test_error_record_path_appends_rather_than_replaces_existing_extension() {
        // a study folder name containing a dot (e.g. a patient-name-derived
        // basename) must not have that suffix clobbered by `with_extension`.
        let dest = Utf8PathBuf::from("/failed/clinicA/2026-07-27/John.Doe_2024-01-15");
        let path = error_record_path(&dest);
        assert_eq!(
            path,
            Utf8PathBuf::from("/failed/clinicA/2026-07-27/John.Doe_2024-01-15.error.json")
        );
    }
}
