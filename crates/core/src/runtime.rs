use std::env;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;

use tracing::{info, warn};

#[cfg(unix)]
const ORT_LIB_NAME: &str = "libonnxruntime.so";
#[cfg(windows)]
const ORT_LIB_NAME: &str = "onnxruntime.dll";

/// Directories searched for the ONNX Runtime shared library, in order:
///   1. `<exe_dir>/lib/`
///   2. `<exe_dir>/../lib/`
///   3. `<cwd>/lib/`
///   4. `/usr/local/lib/`, `/usr/lib/` (Unix only)
fn candidate_lib_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(exe) = env::current_exe().and_then(|p| p.canonicalize()) {
        if let Some(exe_dir) = exe.parent() {
            dirs.push(exe_dir.join("lib"));
            if let Some(parent) = exe_dir.parent() {
                dirs.push(parent.join("lib"));
            }
        }
    }
    if let Ok(cwd) = env::current_dir() {
        let cwd_lib = cwd.join("lib");
        if !dirs.contains(&cwd_lib) {
            dirs.push(cwd_lib);
        }
    }
    #[cfg(unix)]
    {
        dirs.push(PathBuf::from("/usr/local/lib"));
        dirs.push(PathBuf::from("/usr/lib"));
    }
    dirs
}

/// Bundled tool directories (next to the executable and under `./bin`),
/// followed by every entry of `PATH`.
fn candidate_bin_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(exe) = env::current_exe().and_then(|p| p.canonicalize()) {
        if let Some(exe_dir) = exe.parent() {
            dirs.push(exe_dir.to_path_buf());
            dirs.push(exe_dir.join("bin"));
        }
    }

    if let Ok(cwd) = env::current_dir() {
        let cwd_bin = cwd.join("bin");
        if !dirs.contains(&cwd_bin) {
            dirs.push(cwd_bin);
        }
    }

    if let Some(path) = env::var_os("PATH") {
        for dir in env::split_paths(&path) {
            if !dir.as_os_str().is_empty() && !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }

    dirs
}

#[cfg(unix)]
fn candidate_binary_names(binary: &str) -> Vec<String> {
    vec![binary.to_string()]
}

#[cfg(windows)]
fn candidate_binary_names(binary: &str) -> Vec<String> {
    let lower = binary.to_ascii_lowercase();
    if lower.ends_with(".exe") || lower.ends_with(".cmd") || lower.ends_with(".bat") {
        return vec![binary.to_string()];
    }
    vec![
        format!("{binary}.exe"),
        format!("{binary}.cmd"),
        binary.to_string(),
    ]
}

fn find_binary_in_dirs(binary: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let names = candidate_binary_names(binary);
    for dir in dirs {
        for name in &names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Locate an executable. Explicit paths are checked as-is; bare names are
/// searched in the bundled directories first and then on `PATH`.
pub fn resolve_binary(binary: &str) -> Option<PathBuf> {
    let as_path = Path::new(binary);
    if as_path.components().count() > 1 {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }
    find_binary_in_dirs(binary, &candidate_bin_dirs())
}

pub fn command_for(binary: &str) -> ProcessCommand {
    match resolve_binary(binary) {
        Some(path) => ProcessCommand::new(path),
        None => ProcessCommand::new(binary),
    }
}

fn find_ort_dylib_in_dirs(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(ORT_LIB_NAME))
        .find(|candidate| candidate.is_file())
}

/// Point `ort` at a bundled ONNX Runtime library before the first session is
/// built. Must run before any other thread is spawned.
pub fn setup_runtime_libs() {
    if env::var_os("ORT_DYLIB_PATH").is_some() {
        return;
    }
    if let Some(path) = find_ort_dylib_in_dirs(&candidate_lib_dirs()) {
        env::set_var("ORT_DYLIB_PATH", &path);
    }
}

/// Call after tracing is initialized.
pub fn log_runtime_lib_status() {
    match env::var("ORT_DYLIB_PATH") {
        Ok(ort) if Path::new(&ort).is_file() => info!("ORT library: {ort}"),
        Ok(ort) => warn!("ORT_DYLIB_PATH set to {ort} but file not found"),
        Err(_) => warn!("ORT_DYLIB_PATH not set; ORT will try default search paths"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn candidate_lib_dirs_contains_system_paths() {
        let dirs = candidate_lib_dirs();
        assert!(dirs.contains(&PathBuf::from("/usr/local/lib")));
        assert!(dirs.contains(&PathBuf::from("/usr/lib")));
    }

    #[test]
    fn candidate_bin_dirs_includes_cwd_bin() {
        let dirs = candidate_bin_dirs();
        if let Ok(cwd) = env::current_dir() {
            assert!(dirs.contains(&cwd.join("bin")));
        }
    }

    #[test]
    fn find_binary_in_dirs_prefers_first_match() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        std::fs::create_dir_all(&first).expect("first dir should be created");
        std::fs::create_dir_all(&second).expect("second dir should be created");

        #[cfg(unix)]
        let binary_name = "pget";
        #[cfg(windows)]
        let binary_name = "pget.exe";

        std::fs::write(first.join(binary_name), b"first").expect("first binary should exist");
        std::fs::write(second.join(binary_name), b"second").expect("second binary should exist");

        let resolved = find_binary_in_dirs("pget", &[first.clone(), second])
            .expect("binary should be resolved");
        assert_eq!(resolved, first.join(binary_name));
    }

    #[test]
    fn find_binary_in_dirs_misses_absent_tool() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        assert_eq!(
            find_binary_in_dirs("definitely-not-a-real-tool", &[temp.path().to_path_buf()]),
            None
        );
    }

    #[test]
    fn resolve_binary_checks_explicit_paths_directly() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let tool = temp.path().join("custom-fetch");
        assert_eq!(resolve_binary(tool.to_str().expect("utf8 path")), None);

        std::fs::write(&tool, b"#!/bin/sh\n").expect("tool should be written");
        assert_eq!(
            resolve_binary(tool.to_str().expect("utf8 path")),
            Some(tool.clone())
        );
    }

    #[test]
    fn find_ort_dylib_in_dirs_finds_bundled_library() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        assert_eq!(find_ort_dylib_in_dirs(&[temp.path().to_path_buf()]), None);

        std::fs::write(temp.path().join(ORT_LIB_NAME), b"").expect("lib should be written");
        assert_eq!(
            find_ort_dylib_in_dirs(&[temp.path().to_path_buf()]),
            Some(temp.path().join(ORT_LIB_NAME))
        );
    }
}
