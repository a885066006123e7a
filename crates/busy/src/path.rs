//! The canonical path model.
//!
//! Every path the front end touches is kept in one canonical textual form:
//! `//` for absolute roots (`//c:/…` for Windows drives), `./` for
//! current-relative paths, or a leading run of `../` segments. Two paths
//! denote the same location iff their canonical forms are byte-equal. All
//! functions here are total and report failure through [`PathError`]; the
//! only functions that touch the filesystem are [`copy`] and [`exists`].

use std::fs;
use std::time::SystemTime;

use crate::unicode::{decode_utf8, is_forbidden_fs_char};

/// Upper bound for a canonical path, mirroring the usual OS `PATH_MAX`.
const MAX_PATH_LEN: usize = 4096;

/// Failure modes of the path functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// The input denotes something this model cannot represent
    /// (`~`, `\\host\…`, mixed drive roots).
    NotSupported,
    /// The input is malformed (forbidden character, empty segment,
    /// misplaced `.`/`..`, trailing separator).
    InvalidFormat,
    /// The result would exceed [`MAX_PATH_LEN`].
    OutOfSpace,
}

pub type PathResult<T> = Result<T, PathError>;

/// Parts of a path selectable by [`path_part`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPart {
    /// The whole path, denormalized when absolute.
    All,
    /// The last segment.
    FileName,
    /// Everything before the last segment, without the trailing slash.
    FilePath,
    /// The last segment up to its first `.`.
    BaseName,
    /// The last segment up to its last `.`.
    CompleteBaseName,
    /// The last segment from its last `.` (without the dot).
    Extension,
}

/// Converts an OS path into canonical form.
///
/// Leading and trailing whitespace is skipped. Drive roots (`c:\…`) become
/// `//c:/…`, a Unix root becomes `//`, a bare relative name is prefixed
/// with `./`, and backslashes turn into forward slashes. Empty segments,
/// `.`/`..` segments outside the leading `../` run, forbidden characters,
/// and trailing separators are [`PathError::InvalidFormat`].
pub fn normalize(input: &str) -> PathResult<String> {
    let input = input.trim();
    let bytes = input.as_bytes();
    if bytes.first() == Some(&b'~') {
        return Err(PathError::NotSupported);
    }
    if bytes.len() > 1 && (bytes[..2] == *b"//" || bytes[..2] == *b"\\\\") {
        return Err(PathError::NotSupported);
    }

    let mut out = String::new();
    let mut rest: &[u8];
    // out positions of the last emitted '/' and '.'
    let mut last_slash: isize;
    let mut last_dot: isize = -1;

    if bytes.len() > 1 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        out.push_str("//");
        out.push(bytes[0] as char);
        out.push(':');
        rest = &bytes[2..];
        last_slash = 1;
        if rest.is_empty() {
            return Ok(out);
        }
        if rest[0] == b'/' || rest[0] == b'\\' {
            last_slash = out.len() as isize;
            out.push('/');
            rest = &rest[1..];
        } else {
            let (cp, n) = decode_utf8(rest);
            if n == 0 || is_forbidden_fs_char(cp) {
                return Err(PathError::InvalidFormat);
            }
            return Err(PathError::NotSupported);
        }
    } else if !bytes.is_empty() && (bytes[0] == b'/' || bytes[0] == b'\\') {
        out.push_str("//");
        rest = &bytes[1..];
        last_slash = 1;
    } else if bytes.len() > 1 && bytes[0] == b'.' && bytes[1] == b'.' {
        out.push_str("..");
        rest = &bytes[2..];
        while rest.len() >= 3 && (rest[0] == b'/' || rest[0] == b'\\') && rest[1] == b'.' && rest[2] == b'.' {
            out.push_str("/..");
            if out.len() >= MAX_PATH_LEN {
                return Err(PathError::OutOfSpace);
            }
            rest = &rest[3..];
        }
        if rest.is_empty() {
            return Ok(out);
        }
        if rest[0] == b'/' || rest[0] == b'\\' {
            last_slash = out.len() as isize;
            out.push('/');
            rest = &rest[1..];
        } else {
            return Err(PathError::InvalidFormat);
        }
    } else if !bytes.is_empty() && bytes[0] == b'.' {
        out.push('.');
        rest = &bytes[1..];
        if rest.is_empty() {
            return Ok(out);
        }
        if rest[0] == b'/' || rest[0] == b'\\' {
            last_slash = out.len() as isize;
            out.push('/');
            rest = &rest[1..];
        } else {
            return Err(PathError::InvalidFormat);
        }
    } else {
        // a relative path starting directly with a name; prefix with './'
        let (cp, n) = decode_utf8(bytes);
        if n == 0 || is_forbidden_fs_char(cp) {
            return Err(PathError::InvalidFormat);
        }
        out.push_str("./");
        rest = bytes;
        last_slash = 1;
    }

    while !rest.is_empty() {
        let (cp, n) = decode_utf8(rest);
        if n == 0 {
            return Err(PathError::InvalidFormat);
        }
        if cp == u32::from(b'/') || cp == u32::from(b'\\') {
            let diff = out.len() as isize - last_slash;
            match diff {
                1 => return Err(PathError::InvalidFormat),
                2 => {
                    if out.ends_with("/.") {
                        return Err(PathError::InvalidFormat);
                    }
                }
                3 => {
                    if out.ends_with("/..") {
                        return Err(PathError::InvalidFormat);
                    }
                }
                _ => {}
            }
            last_slash = out.len() as isize;
        } else if cp == u32::from(b'.') {
            if last_dot >= 0 && out.len() as isize - last_dot == 1 {
                return Err(PathError::InvalidFormat);
            }
            last_dot = out.len() as isize;
        } else if is_forbidden_fs_char(cp) {
            return Err(PathError::InvalidFormat);
        }
        if cp == u32::from(b'\\') {
            out.push('/');
        } else {
            out.push_str(std::str::from_utf8(&rest[..n]).map_err(|_| PathError::InvalidFormat)?);
        }
        if out.len() >= MAX_PATH_LEN {
            return Err(PathError::OutOfSpace);
        }
        rest = &rest[n..];
    }

    if out.len() > 2 && (out.ends_with('/') || out.ends_with('.')) {
        return Err(PathError::InvalidFormat);
    }
    Ok(out)
}

/// Strips the `//` prefix of an absolute path, yielding the OS-native form.
///
/// `//c:/x` becomes `c:/x`, `//usr` becomes `/usr`; relative paths pass
/// through unchanged.
pub fn denormalize(path: &str) -> &str {
    if let Some(stripped) = path.strip_prefix('/') {
        debug_assert!(stripped.starts_with('/'));
        if path.len() >= 4 && path.as_bytes()[3] == b':' {
            &path[2..]
        } else {
            stripped
        }
    } else {
        path
    }
}

/// Whether a canonical absolute path has a Windows drive root.
pub fn is_win_root(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() >= 4 && b[0] == b'/' && b[1] == b'/' && b[2].is_ascii_alphabetic() && b[3] == b':'
}

/// Joins a canonical base with a canonical relative path.
///
/// A base of `.` yields the right side unchanged. A leading `../` run on
/// the right pops segments from the base; exhausting the base fails. An
/// absolute right side is rejected.
pub fn join(base: &str, rel: &str) -> PathResult<String> {
    if rel.starts_with("//") {
        return Err(PathError::NotSupported);
    }
    if base == "." {
        return Ok(rel.to_string());
    }
    if let Some(mut rest) = rel.strip_prefix("..") {
        debug_assert!(!base.ends_with('/'));
        let mut keep = match base.rfind('/') {
            Some(i) => i,
            None => return Err(PathError::InvalidFormat),
        };
        if keep < 1 {
            // would use '//' as a segment
            return Err(PathError::InvalidFormat);
        }
        while let Some(r) = rest.strip_prefix("/..") {
            rest = r;
            keep = match base[..keep].rfind('/') {
                Some(i) => i,
                None => return Err(PathError::InvalidFormat),
            };
            if keep < 1 {
                return Err(PathError::InvalidFormat);
            }
        }
        Ok(format!("{}{}", &base[..keep], rest))
    } else if let Some(rest) = rel.strip_prefix('.') {
        Ok(format!("{base}{rest}"))
    } else {
        // canonical relative paths always start with '.' or '..'
        Err(PathError::InvalidFormat)
    }
}

/// Computes the relative path from `ref_dir` to `target`.
///
/// Both must be canonical absolute paths of the same drive kind. Returns a
/// `./…` path when `target` lies under `ref_dir`, otherwise a `../…` chain
/// derived from the directory-depth difference.
pub fn make_relative(ref_dir: &str, target: &str) -> PathResult<String> {
    if !ref_dir.starts_with('/') || !target.starts_with('/') {
        return Err(PathError::InvalidFormat);
    }
    let ref_win = is_win_root(ref_dir);
    let target_win = is_win_root(target);
    if ref_win != target_win {
        return Err(PathError::InvalidFormat);
    }
    if ref_win && ref_dir.as_bytes().get(..4) != target.as_bytes().get(..4) {
        return Err(PathError::NotSupported);
    }

    let rb = ref_dir.as_bytes();
    let tb = target.as_bytes();
    let mut head = 0usize;
    while head < rb.len() && head < tb.len() && rb[head] == tb[head] {
        head += 1;
    }
    if head < 2 {
        return Err(PathError::NotSupported);
    }

    let ref_exhausted = head == rb.len();
    let target_boundary = head == tb.len() || tb[head] == b'/';

    let mut level = 0usize;
    if !(ref_exhausted && (target_boundary || head == 2)) {
        // the mismatch may sit inside a shared name prefix; back up to the
        // enclosing separator
        while head > 0 && rb.get(head) != Some(&b'/') {
            head -= 1;
        }
        debug_assert_eq!(rb.get(head), Some(&b'/'));
        level = 1;
        let mut i = rb.len() - 1;
        while i > head {
            if rb[i] == b'/' {
                level += 1;
            }
            i -= 1;
        }
    }

    let suffix = if head == 2 && level == 0 {
        &target[head..]
    } else {
        target.get(head + 1..).unwrap_or("")
    };
    if level == 0 {
        Ok(format!("./{suffix}"))
    } else {
        let mut out = String::with_capacity(level * 3 + suffix.len());
        for _ in 0..level {
            out.push_str("../");
        }
        out.push_str(suffix);
        Ok(out)
    }
}

/// Extracts a part of a canonical path. Never allocates: the result is a
/// slice of the input.
pub fn path_part(path: &str, which: PathPart) -> &str {
    match which {
        PathPart::All => {
            if path.starts_with("//") {
                denormalize(path)
            } else {
                path
            }
        }
        PathPart::FileName => match path.rfind('/') {
            Some(i) => &path[i + 1..],
            None => "",
        },
        PathPart::FilePath => {
            let name = path_part(path, PathPart::FileName);
            if name.is_empty() {
                return "";
            }
            let head = &path[..path.len() - name.len() - 1];
            if head.starts_with("//") { denormalize(head) } else { head }
        }
        PathPart::BaseName => {
            let name = path_part(path, PathPart::FileName);
            match name.find('.') {
                Some(i) => &name[..i],
                None => name,
            }
        }
        PathPart::CompleteBaseName => {
            let name = path_part(path, PathPart::FileName);
            match name.rfind('.') {
                Some(i) => &name[..i],
                None => name,
            }
        }
        PathPart::Extension => {
            let name = path_part(path, PathPart::FileName);
            match name.rfind('.') {
                Some(i) => &name[i + 1..],
                None => "",
            }
        }
    }
}

/// Directory context for the build-dir placeholders.
#[derive(Debug, Clone, Copy)]
pub struct ExpansionDirs<'a> {
    pub root_build_dir: &'a str,
    pub current_build_dir: &'a str,
}

/// Replaces `{{…}}` placeholders in `template` with parts of `source`.
///
/// Recognized tokens: `source`, `source_file_part`, `source_name_part`,
/// `source_dir`, `source_ext`, `root_build_dir`, `current_build_dir`.
/// With `file_parts_only` the whole-path tokens (`source`, `source_dir`)
/// are rejected. The build-dir tokens require `dirs`. An unmatched `{{`
/// is [`PathError::InvalidFormat`], an unknown token
/// [`PathError::NotSupported`].
pub fn apply_expansion(
    source: &str,
    template: &str,
    file_parts_only: bool,
    dirs: Option<ExpansionDirs<'_>>,
) -> PathResult<String> {
    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(PathError::InvalidFormat);
        };
        let token = &after[..end];
        if token.is_empty() {
            return Err(PathError::InvalidFormat);
        }
        let replacement = match token {
            "source" if !file_parts_only => path_part(source, PathPart::All),
            "source_file_part" => path_part(source, PathPart::FileName),
            "source_name_part" => path_part(source, PathPart::CompleteBaseName),
            "source_dir" if !file_parts_only => path_part(source, PathPart::FilePath),
            "source_ext" => path_part(source, PathPart::Extension),
            "root_build_dir" => dirs.ok_or(PathError::NotSupported)?.root_build_dir,
            "current_build_dir" => dirs.ok_or(PathError::NotSupported)?.current_build_dir,
            _ => return Err(PathError::NotSupported),
        };
        out.push_str(replacement);
        if out.len() >= MAX_PATH_LEN {
            return Err(PathError::OutOfSpace);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Modification time of the file at a canonical path, `None` if absent.
pub fn exists(path: &str) -> Option<SystemTime> {
    fs::metadata(denormalize(path)).and_then(|m| m.modified()).ok()
}

/// Copies `from` to `to` (both canonical), creating the destination
/// directory tree first.
pub fn copy(to: &str, from: &str) -> std::io::Result<()> {
    let dir = apply_expansion(to, "{{source_dir}}", false, None)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid target path"))?;
    fs::create_dir_all(denormalize(&dir))?;
    fs::copy(denormalize(from), denormalize(to))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn normalize_roots() {
        assert_eq!(normalize("/usr/lib"), Ok("//usr/lib".to_string()));
        assert_eq!(normalize("/"), Ok("//".to_string()));
        assert_eq!(normalize("C:\\tools"), Ok("//C:/tools".to_string()));
        assert_eq!(normalize("C:"), Ok("//C:".to_string()));
        assert_eq!(normalize("src/main.c"), Ok("./src/main.c".to_string()));
        assert_eq!(normalize("./a/b"), Ok("./a/b".to_string()));
        assert_eq!(normalize("."), Ok(".".to_string()));
        assert_eq!(normalize(".."), Ok("..".to_string()));
        assert_eq!(normalize("../../x"), Ok("../../x".to_string()));
    }

    #[test]
    fn normalize_rejects() {
        assert_eq!(normalize("~"), Err(PathError::NotSupported));
        assert_eq!(normalize("\\\\host\\share"), Err(PathError::NotSupported));
        assert_eq!(normalize("C:relative"), Err(PathError::NotSupported));
        assert_eq!(normalize("a//b"), Err(PathError::InvalidFormat));
        assert_eq!(normalize("a/./b"), Err(PathError::InvalidFormat));
        assert_eq!(normalize("a/../b"), Err(PathError::InvalidFormat));
        assert_eq!(normalize("a..b"), Err(PathError::InvalidFormat));
        assert_eq!(normalize("a/b/"), Err(PathError::InvalidFormat));
        assert_eq!(normalize("a/b."), Err(PathError::InvalidFormat));
        assert_eq!(normalize("a|b"), Err(PathError::InvalidFormat));
    }

    #[test]
    fn normalize_skips_whitespace() {
        assert_eq!(normalize("  ./x \t"), Ok("./x".to_string()));
    }

    #[test]
    fn denormalize_round_trip() {
        for p in ["//usr/lib", "//C:/tools", "./a", "../a"] {
            assert_eq!(normalize(denormalize(p)).unwrap(), p);
        }
    }

    #[test]
    fn join_basics() {
        assert_eq!(join("//a/b", "./c"), Ok("//a/b/c".to_string()));
        assert_eq!(join(".", "./c"), Ok("./c".to_string()));
        assert_eq!(join("//a/b", ".."), Ok("//a".to_string()));
        assert_eq!(join("//a/b/c", "../../d"), Ok("//a/d".to_string()));
        assert_eq!(join("//a", ".."), Err(PathError::InvalidFormat));
        assert_eq!(join("//a/b", "//c"), Err(PathError::NotSupported));
    }

    #[test]
    fn make_relative_cases() {
        // target under ref
        assert_eq!(make_relative("//m/lean", "//m/lean/app"), Ok("./app".to_string()));
        // identical
        assert_eq!(make_relative("//m/lean", "//m/lean"), Ok("./".to_string()));
        // sibling
        assert_eq!(make_relative("//m/lean", "//m/qt/core"), Ok("../qt/core".to_string()));
        // ref below target
        assert_eq!(make_relative("//m/lean/app", "//m/lean"), Ok("../".to_string()));
        // shared name prefix must not fuse segments
        assert_eq!(make_relative("//m/leancreator", "//m/leanqt"), Ok("../leanqt".to_string()));
        assert_eq!(make_relative("//C:/a", "//D:/b"), Err(PathError::NotSupported));
        assert_eq!(make_relative("./a", "//b"), Err(PathError::InvalidFormat));
    }

    #[test]
    fn path_parts() {
        let p = "//home/u/lib.tar.gz";
        assert_eq!(path_part(p, PathPart::All), "/home/u/lib.tar.gz");
        assert_eq!(path_part(p, PathPart::FileName), "lib.tar.gz");
        assert_eq!(path_part(p, PathPart::FilePath), "/home/u");
        assert_eq!(path_part(p, PathPart::BaseName), "lib");
        assert_eq!(path_part(p, PathPart::CompleteBaseName), "lib.tar");
        assert_eq!(path_part(p, PathPart::Extension), "gz");
    }

    #[test]
    fn expansion() {
        let src = "./src/app.txt";
        assert_eq!(
            apply_expansion(src, "{{source_name_part}}.copy", true, None),
            Ok("app.copy".to_string())
        );
        assert_eq!(apply_expansion(src, "{{source}}", true, None), Err(PathError::NotSupported));
        assert_eq!(apply_expansion(src, "{{oops", true, None), Err(PathError::InvalidFormat));
        assert_eq!(apply_expansion(src, "{{unknown}}", true, None), Err(PathError::NotSupported));
        let dirs = ExpansionDirs { root_build_dir: "//out", current_build_dir: "//out/sub" };
        assert_eq!(
            apply_expansion(src, "{{root_build_dir}}/x", false, Some(dirs)),
            Ok("//out/x".to_string())
        );
    }

    #[test]
    fn copy_creates_target_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = normalize(tmp.path().to_str().unwrap()).unwrap();
        let from = join(&root, "./a.txt").unwrap();
        std::fs::write(denormalize(&from), b"hello").unwrap();
        let to = join(&root, "./deep/nested/b.txt").unwrap();
        copy(&to, &from).unwrap();
        assert_eq!(std::fs::read(denormalize(&to)).unwrap(), b"hello");
        assert!(exists(&to).is_some());
        assert!(exists(&join(&root, "./missing").unwrap()).is_none());
    }
}
