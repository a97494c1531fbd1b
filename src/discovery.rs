use camino::{Utf8Path, Utf8PathBuf};
use dicom::object::OpenFileOptions;
use walkdir::WalkDir;

/// Extensions that are never treated as DICOM instances, regardless of
/// whether their contents parse as DICOM.
const DISALLOWED_EXTENSIONS: [&str; 3] = ["json", "txt", "log"];

/// Recursively walk `folder` and return the paths of every file that counts
/// as a DICOM instance: a case-insensitive `.dcm` extension, or a file with
/// no disallowed extension whose metadata parses as DICOM.
///
/// Returned paths are deduplicated and in the (deterministic, but otherwise
/// unspecified) order `walkdir` visits them.
pub fn discover_instances(folder: &Utf8Path) -> std::io::Result<Vec<Utf8PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(folder).into_iter() {
        let entry = entry.map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 file path");
            continue;
        };
        let path = path.to_path_buf();
        if is_instance_file(&path) {
            found.push(path);
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn is_instance_file(path: &Utf8Path) -> bool {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("dcm") => true,
        Some(ext) if DISALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => false,
        _ => parses_as_dicom_metadata(path),
    }
}

fn parses_as_dicom_metadata(path: &Utf8Path) -> bool {
    OpenFileOptions::new()
        .read_until(dicom::dictionary_std::tags::PIXEL_DATA)
        .open_file(path)
        .is_ok()
}
