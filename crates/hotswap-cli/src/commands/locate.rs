//! `hotswap locate` command implementation

use std::path::Path;

use hotswap_runtime::library_file_name;

/// Print the platform file name of `name` and where it resolves to
pub fn run(name: &str, source_dir: &Path, json: bool) -> anyhow::Result<()> {
    let file_name = library_file_name(name);
    let path = source_dir.join(&file_name);
    let exists = path.is_file();

    if json {
        let value = serde_json::json!({
            "name": name,
            "file_name": file_name,
            "path": path,
            "exists": exists,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", file_name);
        println!("{}", path.display());
    }

    if !exists {
        anyhow::bail!("Module {} not found at {}", name, path.display());
    }
    Ok(())
}
