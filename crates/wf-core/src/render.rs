//! Tiny `{{var}}` template substitution used by [`crate::steps::pipe::TemplatePipe`].
//! Deliberately small and predictable, grounded in the teacher crate's own
//! `render_template` helper rather than pulling in a templating engine for
//! one substitution rule.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use regex::Regex;

/// Replaces every `{{ key }}` (optional surrounding whitespace) in `input`
/// with `vars["key"]`. Errors on a referenced key with no entry in `vars`.
pub fn render_template(input: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let re = Regex::new(r#"\{\{\s*([a-zA-Z0-9_\-\.]+)\s*\}\}"#).unwrap();
    let mut out = String::with_capacity(input.len());
    let mut last = 0usize;

    for cap in re.captures_iter(input) {
        let m = cap.get(0).unwrap();
        let key = cap.get(1).unwrap().as_str();
        out.push_str(&input[last..m.start()]);
        match vars.get(key) {
            Some(v) => out.push_str(v),
            None => return Err(anyhow!("missing template var: `{key}`")),
        }
        last = m.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}
