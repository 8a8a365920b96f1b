//! Language detection from changed-file extensions.

use std::collections::BTreeSet;
use std::path::Path;

fn language_for_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "py" | "pyi" => Some("python"),
        "rs" => Some("rust"),
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => Some("javascript"),
        "ex" | "exs" | "heex" | "leex" => Some("elixir"),
        "cs" | "csx" => Some("csharp"),
        _ => None,
    }
}

/// Canonical language keys for the given paths, sorted.
pub fn detect(files: &[String]) -> BTreeSet<String> {
    files
        .iter()
        .filter_map(|file| Path::new(file).extension())
        .filter_map(|ext| language_for_extension(&ext.to_string_lossy().to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Use the comma-separated `override_list` when it names at least one
/// language; otherwise detect from `files`.
pub fn resolve(files: &[String], override_list: Option<&str>) -> BTreeSet<String> {
    if let Some(list) = override_list {
        let chosen: BTreeSet<String> = list
            .split(',')
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
            .collect();
        if !chosen.is_empty() {
            return chosen;
        }
    }
    detect(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn detects_from_extensions() {
        let langs = detect(&files(&["src/lib.rs", "app/main.PY", "web/x.tsx", "README"]));
        let langs: Vec<&str> = langs.iter().map(String::as_str).collect();
        assert_eq!(langs, vec!["javascript", "python", "rust"]);
    }

    #[test]
    fn override_replaces_detection() {
        let langs = resolve(&files(&["src/lib.rs"]), Some(" elixir , csharp"));
        let langs: Vec<&str> = langs.iter().map(String::as_str).collect();
        assert_eq!(langs, vec!["csharp", "elixir"]);
    }

    #[test]
    fn blank_override_falls_back() {
        let langs = resolve(&files(&["src/lib.rs"]), Some(" , "));
        assert!(langs.contains("rust"));
    }
}
