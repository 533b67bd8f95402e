//! Dependency manifest upkeep for generated artifacts.
//!
//! New third-party imports are appended to `requirements.txt` as
//! `<package>>=0.0.0`. Standard library, relative and first-party modules are
//! never added, and neither is anything the manifest already declares.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::errors::PipelineError;
use crate::gates::python::PythonModule;

pub const MANIFEST_FILE: &str = "requirements.txt";

/// Top-level modules shipped with CPython 3.
const STDLIB_MODULES: &[&str] = &[
    "__future__", "_thread", "abc", "aifc", "argparse", "array", "ast", "asynchat", "asyncio",
    "asyncore", "atexit", "audioop", "base64", "bdb", "binascii", "bisect", "builtins", "bz2",
    "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd", "code", "codecs", "codeop",
    "collections", "colorsys", "compileall", "concurrent", "configparser", "contextlib",
    "contextvars", "copy", "copyreg", "cProfile", "crypt", "csv", "ctypes", "curses",
    "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis", "doctest", "email",
    "encodings", "ensurepip", "enum", "errno", "faulthandler", "fcntl", "filecmp", "fileinput",
    "fnmatch", "fractions", "ftplib", "functools", "gc", "getopt", "getpass", "gettext", "glob",
    "graphlib", "grp", "gzip", "hashlib", "heapq", "hmac", "html", "http", "imaplib", "imghdr",
    "importlib", "inspect", "io", "ipaddress", "itertools", "json", "keyword", "lib2to3",
    "linecache", "locale", "logging", "lzma", "mailbox", "mailcap", "marshal", "math",
    "mimetypes", "mmap", "modulefinder", "msvcrt", "multiprocessing", "netrc", "nntplib",
    "numbers", "operator", "optparse", "os", "ossaudiodev", "pathlib", "pdb", "pickle",
    "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib", "posix", "pprint",
    "profile", "pstats", "pty", "pwd", "py_compile", "pyclbr", "pydoc", "queue", "quopri",
    "random", "re", "readline", "reprlib", "resource", "rlcompleter", "runpy", "sched",
    "secrets", "select", "selectors", "shelve", "shlex", "shutil", "signal", "site", "smtplib",
    "sndhdr", "socket", "socketserver", "spwd", "sqlite3", "ssl", "stat", "statistics",
    "string", "stringprep", "struct", "subprocess", "sunau", "symtable", "sys", "sysconfig",
    "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "textwrap",
    "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib", "trace",
    "traceback", "tracemalloc", "tty", "turtle", "types", "typing", "unicodedata", "unittest",
    "urllib", "uu", "uuid", "venv", "warnings", "wave", "weakref", "webbrowser", "winreg",
    "winsound", "wsgiref", "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib",
    "zoneinfo",
];

pub fn is_stdlib(module: &str) -> bool {
    STDLIB_MODULES.contains(&module)
}

/// A module or package with this name exists in `dir`.
fn is_local_module(dir: &Path, module: &str) -> bool {
    dir.join(format!("{}.py", module)).is_file() || dir.join(module).is_dir()
}

/// PEP 503 style normalization so `Foo_Bar` and `foo-bar` compare equal.
fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace(['_', '.'], "-")
}

/// Package names declared in manifest `content`, normalized.
fn declared_packages(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty() && !line.starts_with('-'))
        .filter_map(|line| {
            line.split(|c: char| "=<>!~[;@ ".contains(c))
                .next()
                .filter(|name| !name.is_empty())
                .map(normalize)
        })
        .collect()
}

/// Imports in `new` that were not already imported by `old` and need a
/// manifest entry.
pub fn new_third_party_imports(
    workdir: &Path,
    source_root: &Path,
    old: &str,
    new: &str,
) -> Vec<String> {
    let before: HashSet<String> = PythonModule::parse(old)
        .map(|m| m.imported_roots().into_iter().collect())
        .unwrap_or_default();
    let Ok(module) = PythonModule::parse(new) else {
        return Vec::new();
    };
    module
        .imported_roots()
        .into_iter()
        .filter(|root| !before.contains(root))
        .filter(|root| !is_stdlib(root))
        .filter(|root| !is_local_module(workdir, root) && !is_local_module(source_root, root))
        .collect()
}

/// Append one line per missing package to `<workdir>/requirements.txt`.
/// Returns the packages that were added.
pub fn update_requirements(
    workdir: &Path,
    source_root: &Path,
    old: &str,
    new: &str,
) -> Result<Vec<String>, PipelineError> {
    let candidates = new_third_party_imports(workdir, source_root, old, new);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let path = workdir.join(MANIFEST_FILE);
    let existing = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(PipelineError::io(&path, e)),
    };
    let declared = declared_packages(&existing);
    let added: Vec<String> = candidates
        .into_iter()
        .filter(|pkg| !declared.contains(&normalize(pkg)))
        .collect();
    if added.is_empty() {
        return Ok(added);
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| PipelineError::io(&path, e))?;
    let mut block = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        block.push('\n');
    }
    for pkg in &added {
        block.push_str(&format!("{}>=0.0.0\n", pkg));
    }
    file.write_all(block.as_bytes())
        .map_err(|e| PipelineError::io(&path, e))?;

    info!(manifest = %path.display(), packages = ?added, "requirements updated");
    Ok(added)
}
