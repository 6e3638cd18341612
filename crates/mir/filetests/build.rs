//! Generates a `#[test]` case for each `.mir` file
//! in subdirectories of `tests`.
//!
//! Each filetest is a MIR graph in S-expression form,
//! preceded by test directives in line comments.
//! A `// @harness <harness_name>` directive is mandatory
//! and names the function in `tests/main.rs` that drives
//! the test case. A sibling file named `<case>.mir.expected`
//! is passed to the harness as the expected output.

use quote::{format_ident, quote};
use std::{env, error::Error, fs, path::Path};

const HARNESS_DIRECTIVE: &str = "// @harness";

/// File stems become function names, so they cannot be keywords.
const RESERVED: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "gen", "if", "impl", "in", "let", "loop", "match", "mod",
    "move", "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true",
    "try", "type", "unsafe", "use", "where", "while", "yield",
];

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    println!("cargo:rerun-if-changed=tests");

    let mut code = Vec::new();

    let mut dirs = fs::read_dir("tests")?.collect::<Result<Vec<_>, _>>()?;
    dirs.sort_by_key(|entry| entry.file_name());
    for entry in dirs {
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().into_owned();

        let mut files = fs::read_dir(entry.path())?.collect::<Result<Vec<_>, _>>()?;
        files.sort_by_key(|entry| entry.file_name());

        let mut tests = Vec::new();
        for file in files {
            let path = file.path();
            if path.extension().is_none_or(|ext| ext != "mir") {
                continue;
            }
            let test_case_name = path
                .file_stem()
                .ok_or("filetest without a name")?
                .to_string_lossy()
                .replace('-', "_");
            if RESERVED.contains(&test_case_name.as_str()) {
                return Err(format!("{} is named after a keyword", path.display()).into());
            }
            let test_case_ident = format_ident!("{test_case_name}");

            let file_contents = fs::read_to_string(&path)?;
            let harness = format_ident!("{}", harness_of(&path, &file_contents)?);

            let mut expected_path = path.clone().into_os_string();
            expected_path.push(".expected");
            let expected_code = if Path::new(&expected_path).exists() {
                let s = fs::read_to_string(&expected_path)?;
                quote! {
                    , #s
                }
            } else {
                quote! {}
            };

            tests.push(quote! {
                #[test]
                fn #test_case_ident() {
                    super::harnesses::#harness(#file_contents #expected_code);
                }
            });
        }

        let module_name = format_ident!("{dir_name}");
        code.push(quote! {
            mod #module_name {
                #(#tests)*
            }
        });
    }

    let code = quote! { #(#code)* };

    let out_path = format!("{}/generated.rs", env::var("OUT_DIR")?);
    fs::write(out_path, code.to_string().as_bytes())?;

    Ok(())
}

fn harness_of<'a>(path: &Path, contents: &'a str) -> Result<&'a str, String> {
    contents
        .lines()
        .find_map(|line| line.trim().strip_prefix(HARNESS_DIRECTIVE))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| format!("{} is missing a `{HARNESS_DIRECTIVE}` directive", path.display()))
}
