//! Vault naming and vault-relative note paths.
//!
//! Directory tokens may be plain paths (`/home/me/Notes/daily`) or
//! storage-access URIs with percent-encoded separators
//! (`content://…/tree/primary%3ANotes%2Fdaily`).  Both are handled.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Characters left untouched by JavaScript's `encodeURIComponent`, which is
/// what Obsidian expects inside `obsidian://` links.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Decoded final component of a directory token, used as the vault name.
pub fn vault_name(directory: &str) -> String {
    let trimmed = directory.trim_end_matches(['/', '\\']);
    let last = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed);
    let last = last.rsplit("%2F").next().unwrap_or(last);
    let decoded = percent_decode_str(last).decode_utf8_lossy();
    // `primary:Notes` style roots keep only the part after the volume.
    decoded
        .rsplit(':')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Path components of a decoded directory token.
fn components(directory: &str) -> Vec<String> {
    let decoded = percent_decode_str(directory).decode_utf8_lossy();
    decoded
        .split(['/', '\\', ':'])
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Note path relative to its vault root, without the file extension.
///
/// The last occurrence of the vault name in `directory` is taken as the vault
/// root.  When the vault name does not appear, the note is assumed to sit at
/// the vault root.
pub fn note_path_in_vault(directory: &str, file_name: &str, vault: &str) -> String {
    let parts = components(directory);
    let inner = match parts.iter().rposition(|part| part == vault) {
        Some(idx) => &parts[idx + 1..],
        None => &parts[parts.len()..],
    };

    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };

    let mut path = inner.join("/");
    if !path.is_empty() {
        path.push('/');
    }
    path.push_str(stem);
    path
}

/// `obsidian://open` link for a note.
pub fn open_url(vault: &str, note_path: &str) -> String {
    format!(
        "obsidian://open?vault={}&file={}",
        utf8_percent_encode(vault, URI_COMPONENT),
        utf8_percent_encode(note_path, URI_COMPONENT),
    )
}

/// `true` when `path` is `ancestor` itself or lies underneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    let Some(rest) = path.strip_prefix(ancestor) else {
        return false;
    };
    rest.is_empty() || rest.starts_with(['/', '\\']) || rest.starts_with("%2F")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_name_from_plain_path() {
        assert_eq!(vault_name("/home/me/Second Brain"), "Second Brain");
        assert_eq!(vault_name("/home/me/Second Brain/"), "Second Brain");
    }

    #[test]
    fn vault_name_from_encoded_uri() {
        let uri = "content://com.android.externalstorage.documents/tree/primary%3ADocuments%2Fmy%20vault";
        assert_eq!(vault_name(uri), "my vault");
        let root = "content://com.android.externalstorage.documents/tree/primary%3AVault";
        assert_eq!(vault_name(root), "Vault");
    }

    #[test]
    fn note_path_is_relative_to_vault_root() {
        assert_eq!(
            note_path_in_vault("/home/me/Brain/projects/q3", "plan.md", "Brain"),
            "projects/q3/plan"
        );
        assert_eq!(note_path_in_vault("/home/me/Brain", "todo.md", "Brain"), "todo");
        assert_eq!(
            note_path_in_vault("primary%3ADocuments%2FBrain%2Fdaily", "2024-01-01.md", "Brain"),
            "daily/2024-01-01"
        );
    }

    #[test]
    fn open_url_encodes_like_uri_components() {
        assert_eq!(
            open_url("My Vault", "projects/q3 plan"),
            "obsidian://open?vault=My%20Vault&file=projects%2Fq3%20plan"
        );
    }

    #[test]
    fn is_within_respects_component_boundaries() {
        assert!(is_within("/v/notes", "/v/notes"));
        assert!(is_within("/v/notes/sub", "/v/notes"));
        assert!(is_within("tree%2Fnotes%2Fsub", "tree%2Fnotes"));
        assert!(!is_within("/v/notes2", "/v/notes"));
        assert!(!is_within("/v", "/v/notes"));
    }
}
