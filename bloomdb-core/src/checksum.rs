//! CRC32 checksums over line-normalized migration content.

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Compute the checksum of a migration body.
///
/// Lines are split on `\r\n`, `\r` or `\n`; the delimiters are not hashed,
/// and a UTF-8 BOM at the start of the first line is dropped. The CRC32
/// (IEEE) result is reinterpreted as a signed 32-bit integer.
pub fn calculate(content: &[u8]) -> i32 {
    let mut hasher = crc32fast::Hasher::new();
    for (i, line) in lines(content).enumerate() {
        let line = if i == 0 {
            line.strip_prefix(UTF8_BOM).unwrap_or(line)
        } else {
            line
        };
        hasher.update(line);
    }
    hasher.finalize() as i32
}

/// Iterate over lines terminated by `\r\n`, `\r` or `\n`.
fn lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = content;
    let mut done = content.is_empty();
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        match rest.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(pos) => {
                let line = &rest[..pos];
                let skip = if rest[pos] == b'\r' && rest.get(pos + 1) == Some(&b'\n') {
                    2
                } else {
                    1
                };
                rest = &rest[pos + skip..];
                Some(line)
            }
            None => {
                done = true;
                Some(rest)
            }
        }
    })
}
