//! Filename sanitization utilities

/// Longest filename we will generate, in characters.
const MAX_NAME_LEN: usize = 150;

/// Sanitize a track title or playlist name for safe filesystem usage.
///
/// Replaces filesystem-unsafe characters with underscores, collapses
/// whitespace, and truncates overly long names.
///
/// # Examples
///
/// ```
/// use playlist2media::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("AC/DC - Back In Black"), "AC_DC - Back In Black");
/// assert_eq!(sanitize_filename("What Is Love?"), "What Is Love_");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            _ => c,
        })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    let mut last_was_space = false;
    for c in replaced.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                collapsed.push(' ');
            }
            last_was_space = true;
        } else {
            collapsed.push(c);
            last_was_space = false;
        }
    }

    let out: String = collapsed.chars().take(MAX_NAME_LEN).collect();
    let out = out.trim_end();
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out.to_string()
    }
}

/// Sanitize a directory name.
///
/// Same rules as [`sanitize_filename`], plus trailing dots and spaces are
/// stripped since Windows rejects them on directories.
pub fn sanitize_dirname(name: &str) -> String {
    let out = sanitize_filename(name);
    let trimmed = out.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
