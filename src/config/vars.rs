//! `${var}` substitution for rule texts and tool prefixes.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

/// Replace every `${key}` in `text` with its value from `vars`.
///
/// Unknown keys and unterminated references are errors, so a typo in a
/// version variable cannot silently produce a rule that matches nothing.
pub fn expand(text: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            bail!("unterminated variable reference in '{}'", rest.trim());
        };
        let key = after[..end].trim();
        match vars.get(key) {
            Some(value) => out.push_str(value),
            None => {
                let known = vars.keys().cloned().collect::<Vec<_>>().join(", ");
                bail!("unknown variable '${{{}}}' (known: {})", key, known)
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
