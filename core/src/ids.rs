/// Document ids are opaque strings minted by the authoring surface. The
/// relay only validates shape: non-empty, bounded, and limited to a
/// conservative character set so ids can be embedded in cache keys and
/// log lines without escaping.
pub const MAX_DOCUMENT_ID_LEN: usize = 255;

pub fn is_valid_document_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_DOCUMENT_ID_LEN {
        return false;
    }

    id.chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'))
}
