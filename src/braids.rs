use std::fmt;

use aliri_braid::braid;

macro_rules! redacted {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    reveal_prefix(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    reveal_prefix(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

/// Writes at most `default_len` characters of a protected string, eliding the
/// remainder, honoring any width supplied in the format specification.
fn reveal_prefix(protected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        return f.write_str("…");
    }
    if max_len > protected.len() {
        return f.write_str(protected);
    }
    match protected.char_indices().nth(max_len - 2) {
        Some((idx, c)) if idx + c.len_utf8() < protected.len() => {
            f.write_str(&protected[0..idx + c.len_utf8()])?;
            f.write_str("…")
        }
        _ => f.write_str(protected),
    }
}

/// The identifier of the protected resource a token grants access to
///
/// For an event-streaming service this is typically the fully-qualified
/// entity path, e.g. `sb://namespace.example.net/hub-name`.
#[braid(serde)]
pub struct Audience;

/// A raw, encoded credential as handed out by a credential source
///
/// The credential material is redacted from `Debug` and `Display` output
/// unless the alternate flag is used.
#[braid(serde, debug = "owned", display = "owned")]
pub struct RawCredential;

redacted!(RawCredentialRef: "CREDENTIAL", 15);

/// The name of a shared access authorization rule
#[braid(serde)]
pub struct SharedAccessKeyName;

/// The secret key material of a shared access authorization rule
#[braid(serde, debug = "owned", display = "owned")]
pub struct SharedAccessKey;

redacted!(SharedAccessKeyRef: "SHARED ACCESS KEY", 5);
