//! Language tagging for file matches.
//!
//! Detection is extension-driven with a handful of well-known basenames;
//! anything unrecognized is simply untagged. Filters compare
//! case-insensitively so callers can send "go" or "Go".

use std::path::Path;

/// Returns the language tag for a path, if recognized.
#[must_use]
pub fn detect(path: &str) -> Option<&'static str> {
    let p = Path::new(path);

    if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
        match name {
            "Makefile" | "makefile" | "GNUmakefile" => return Some("Makefile"),
            "Dockerfile" => return Some("Dockerfile"),
            "CMakeLists.txt" => return Some("CMake"),
            _ => {}
        }
    }

    let ext = p.extension().and_then(|e| e.to_str())?;
    let lang = match ext.to_ascii_lowercase().as_str() {
        "rs" => "Rust",
        "go" => "Go",
        "py" => "Python",
        "js" | "mjs" | "cjs" => "JavaScript",
        "jsx" => "JSX",
        "ts" => "TypeScript",
        "tsx" => "TSX",
        "java" => "Java",
        "c" | "h" => "C",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => "C++",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "kt" | "kts" => "Kotlin",
        "scala" => "Scala",
        "cs" => "C#",
        "fs" => "F#",
        "ml" | "mli" => "OCaml",
        "hs" => "Haskell",
        "clj" | "cljs" => "Clojure",
        "ex" | "exs" => "Elixir",
        "erl" => "Erlang",
        "lua" => "Lua",
        "vim" => "Vim Script",
        "sh" | "bash" | "zsh" | "fish" => "Shell",
        "ps1" => "PowerShell",
        "bat" | "cmd" => "Batchfile",
        "md" | "markdown" => "Markdown",
        "txt" => "Text",
        "json" => "JSON",
        "yaml" | "yml" => "YAML",
        "toml" => "TOML",
        "xml" => "XML",
        "html" | "htm" => "HTML",
        "css" => "CSS",
        "scss" => "SCSS",
        "sql" => "SQL",
        "graphql" | "gql" => "GraphQL",
        "proto" => "Protocol Buffer",
        _ => return None,
    };
    Some(lang)
}

/// Applies include/exclude language filters to a detected language.
///
/// A non-empty include list admits only listed languages (an undetected
/// language fails the include); the exclude list always rejects.
#[must_use]
pub fn passes_filters(language: Option<&str>, include: &[String], exclude: &[String]) -> bool {
    if !include.is_empty() {
        match language {
            Some(lang) => {
                if !include.iter().any(|want| want.eq_ignore_ascii_case(lang)) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(lang) = language {
        if exclude.iter().any(|skip| skip.eq_ignore_ascii_case(lang)) {
            return false;
        }
    }
    true
}
