//! Collects the `EARN_PRICE_*` settings named anywhere under `src/` so that
//! `status` can report which of them are set.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PREFIX: &str = "EARN_PRICE_";

fn source_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn setting_names(source: &str) -> impl Iterator<Item = &str> {
    source
        .split(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
        .filter(|token| token.len() > PREFIX.len() && token.starts_with(PREFIX))
}

fn render(names: &BTreeSet<String>) -> String {
    let mut out = String::from("pub const GENERATED_EARN_ENV_ALLOWLIST: &[&str] = &[\n");
    for name in names {
        out.push_str(&format!("    {name:?},\n"));
    }
    out.push_str("];\n");
    out
}

fn main() -> io::Result<()> {
    let mut names = BTreeSet::new();
    for file in source_files(Path::new("src"))? {
        let source = fs::read_to_string(&file)?;
        names.extend(setting_names(&source).map(str::to_string));
    }

    let out_dir = env::var_os("OUT_DIR").ok_or_else(|| io::Error::other("OUT_DIR is not set"))?;
    fs::write(Path::new(&out_dir).join("earn_env_allowlist.rs"), render(&names))?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    Ok(())
}
