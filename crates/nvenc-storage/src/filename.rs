//! File name normalization for attacker-controlled names.

use std::path::Path;

use crate::error::{StorageError, StorageResult};

/// Reserved prefix marking the input artifact of a job.
pub const INPUT_PREFIX: &str = "input";

/// Extension used when an upload carries none.
pub const DEFAULT_INPUT_EXTENSION: &str = "mp4";

/// Output name used when the request does not ask for one.
pub const DEFAULT_OUTPUT_NAME: &str = "output.mp4";

/// Longest file name accepted inside a job directory.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Reduce a client-supplied name to `[A-Za-z0-9_.-]`.
///
/// Accented Latin letters are folded to their base letter (`é` becomes `e`).
/// Path separators and whitespace runs become a single `_`, every other
/// character outside the allowed set is dropped, and leading or trailing
/// `.`/`_` are stripped. The result may be empty.
pub fn secure_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => ' ',
            c => fold_latin(c).unwrap_or(c),
        })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// ASCII base of a precomposed Latin letter, i.e. what is left of its
/// compatibility decomposition once the combining marks are dropped.
/// Letters without a decomposition (`ß`, `æ`, `ø`, `ł`) yield `None`.
fn fold_latin(c: char) -> Option<char> {
    let base = match c {
        'À'..='Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'à'..='å' | 'ā' | 'ă' | 'ą' => 'a',
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => 'C',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'Ď' => 'D',
        'ď' => 'd',
        'È'..='Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'è'..='ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => 'G',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'Ĥ' => 'H',
        'ĥ' => 'h',
        'Ì'..='Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => 'I',
        'ì'..='ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' => 'i',
        'Ĵ' => 'J',
        'ĵ' => 'j',
        'Ķ' => 'K',
        'ķ' => 'k',
        'Ĺ' | 'Ļ' | 'Ľ' => 'L',
        'ĺ' | 'ļ' | 'ľ' => 'l',
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => 'N',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'Ò'..='Ö' | 'Ō' | 'Ŏ' | 'Ő' => 'O',
        'ò'..='ö' | 'ō' | 'ŏ' | 'ő' => 'o',
        'Ŕ' | 'Ŗ' | 'Ř' => 'R',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => 'S',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'Ţ' | 'Ť' => 'T',
        'ţ' | 'ť' => 't',
        'Ù'..='Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => 'U',
        'ù'..='ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'Ŵ' => 'W',
        'ŵ' => 'w',
        'Ý' | 'Ŷ' | 'Ÿ' => 'Y',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    };
    Some(base)
}

/// Name under which an uploaded file is stored.
///
/// Only the extension of the original name survives; `clip.mov` becomes
/// `input.mov`, and a name without extension becomes `input.mp4`.
pub fn input_file_name(original: &str) -> String {
    let cleaned = secure_filename(original);
    let ext = Path::new(&cleaned)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_INPUT_EXTENSION);
    format!("{INPUT_PREFIX}.{ext}")
}

/// Whether `name` is the input artifact of a job directory.
pub fn is_input_name(name: &str) -> bool {
    name.starts_with(INPUT_PREFIX)
}

/// Validate and normalize a requested output name.
///
/// Separators and parent references are rejected outright rather than
/// rewritten. Names that would be mistaken for the input artifact are
/// rejected as well.
pub fn output_file_name(requested: Option<&str>) -> StorageResult<String> {
    let requested = match requested.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return Ok(DEFAULT_OUTPUT_NAME.to_string()),
    };

    if requested.contains('/') || requested.contains('\\') || requested.contains('\0') {
        return Err(StorageError::invalid_name(format!(
            "output name must not contain path separators: {requested}"
        )));
    }
    if requested.contains("..") {
        return Err(StorageError::invalid_name(format!(
            "output name must not contain parent references: {requested}"
        )));
    }

    let name = secure_filename(requested);
    if name.is_empty() {
        return Err(StorageError::invalid_name(format!(
            "output name has no usable characters: {requested}"
        )));
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(StorageError::invalid_name("output name too long"));
    }
    if is_input_name(&name) {
        return Err(StorageError::invalid_name(format!(
            "output name must not start with reserved prefix '{INPUT_PREFIX}'"
        )));
    }

    Ok(name)
}

/// Validate a file name requested for download.
///
/// Valid format: alphanumeric, hyphens, underscores, dots. No path traversal.
pub fn is_valid_file_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN {
        return false;
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("clip (1).mp4"), "clip_1.mp4");
        assert_eq!(secure_filename("vidéo.mkv"), "video.mkv");
        assert_eq!(secure_filename("Ünïcödé Çlip.mov"), "Unicode_Clip.mov");
        assert_eq!(secure_filename("straße_åøæ.mp4"), "strae_a.mp4");
        assert_eq!(secure_filename("日本語.mp4"), "mp4");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn test_input_name_keeps_only_extension() {
        assert_eq!(input_file_name("clip.mov"), "input.mov");
        assert_eq!(input_file_name("../../evil.sh.mkv"), "input.mkv");
        assert_eq!(input_file_name("noext"), "input.mp4");
        assert_eq!(input_file_name(""), "input.mp4");
        assert_eq!(input_file_name(".mov"), "input.mp4");
    }

    #[test]
    fn test_output_name_defaults() {
        assert_eq!(output_file_name(None).unwrap(), DEFAULT_OUTPUT_NAME);
        assert_eq!(output_file_name(Some("  ")).unwrap(), DEFAULT_OUTPUT_NAME);
        assert_eq!(output_file_name(Some("result.mkv")).unwrap(), "result.mkv");
        assert_eq!(output_file_name(Some("my clip.mp4")).unwrap(), "my_clip.mp4");
    }

    #[test]
    fn test_output_name_rejects_traversal() {
        for bad in ["../out.mp4", "a/b.mp4", "a\\b.mp4", "..", "x..mp4"] {
            assert!(
                matches!(output_file_name(Some(bad)), Err(StorageError::InvalidName(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_output_name_rejects_reserved_prefix() {
        assert!(output_file_name(Some("input.mp4")).is_err());
        assert!(output_file_name(Some("input_copy.mp4")).is_err());
        assert!(output_file_name(Some("???")).is_err());
    }

    #[test]
    fn test_download_name_validation() {
        assert!(is_valid_file_name("output.mp4"));
        assert!(is_valid_file_name("clip_001-final.mp4"));
        assert!(!is_valid_file_name("../etc/passwd"));
        assert!(!is_valid_file_name("path/to/file.mp4"));
        assert!(!is_valid_file_name(""));
    }
}
