use std::io;
use std::path::Path;

use serde::Serialize;

/// A GGUF file in the models directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalModel {
    /// File name, which is also what `start` takes
    pub name: String,
    pub size_bytes: u64,
}

/// `*.gguf` files directly inside `dir`, sorted by name. A missing directory
/// has no models.
pub fn list_models(dir: &Path) -> io::Result<Vec<LocalModel>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut models = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_gguf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"));
        if !is_gguf {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        models.push(LocalModel {
            name: entry.file_name().to_string_lossy().into_owned(),
            size_bytes: metadata.len(),
        });
    }
    models.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(models)
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
