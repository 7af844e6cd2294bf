//! String literal encoding.
//!
//! Every eligible literal becomes `decodeFn([]byte{key...}, []byte{data...})`
//! with `data = value ^ key`. The decode function is appended once to each unit
//! that had something encoded, so decoding happens at the original use site.

use std::fmt::Write as _;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::ObfuscateResult;
use crate::hasher::Hasher;
use crate::syntax::token::unquote;
use crate::syntax::{SourceUnit, StringContext};
use crate::workspace::{load_units, write_units, PackageRecord, PackageSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StringReport {
    /// Units that received a decode function.
    pub units: usize,
    pub literals: usize,
}

/// XOR `value` with `key` (which must be at least as long).
pub fn encode_literal(value: &[u8], key: &[u8]) -> Vec<u8> {
    value.iter().zip(key).map(|(v, k)| v ^ k).collect()
}

pub fn decode_literal(key: &[u8], data: &[u8]) -> Vec<u8> {
    encode_literal(data, key)
}

/// Name of the decode function injected into `file` of package `package_path`.
pub fn decoder_name(hasher: &dyn Hasher, package_path: &str, file: &str) -> String {
    hasher.hash(&format!("{package_path}/{file}#strings"))
}

fn byte_slice(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(8 + bytes.len() * 6);
    out.push_str("[]byte{");
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "0x{b:02x}");
    }
    out.push('}');
    out
}

/// Go expression that evaluates back to the original literal.
pub fn render_call(decoder: &str, key: &[u8], data: &[u8]) -> String {
    format!("{decoder}({}, {})", byte_slice(key), byte_slice(data))
}

/// Go source of the decode function.
pub fn decoder_source(decoder: &str) -> String {
    format!(
        "\nfunc {decoder}(key, data []byte) string {{\n\
         \tout := make([]byte, len(data))\n\
         \tfor i := range data {{\n\
         \t\tout[i] = data[i] ^ key[i]\n\
         \t}}\n\
         \treturn string(out)\n\
         }}\n"
    )
}

/// Encode the eligible literals of one unit. Returns how many were replaced.
pub fn encode_unit(unit: &mut SourceUnit, package_path: &str, hasher: &dyn Hasher) -> usize {
    let file = unit.file_name().to_string();
    let decoder = decoder_name(hasher, package_path, &file);
    let sites: Vec<(usize, usize)> = unit
        .strings
        .iter()
        .enumerate()
        .filter(|(_, site)| site.context == StringContext::Expression)
        .map(|(index, site)| (index, site.token))
        .collect();

    let mut count = 0;
    for (index, token) in sites {
        let Some(value) = unquote(unit.token_text(token)) else {
            let (line, column) = unit.position(token);
            debug!(path = %unit.path.display(), line, column, "skipping malformed literal");
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let context = format!("{package_path}/{file}#{index}");
        let key = hasher.derive_key(context.as_bytes(), value.len());
        let data = encode_literal(&value, &key);
        unit.replace_token(token, render_call(&decoder, &key, &data));
        count += 1;
    }

    if count > 0 {
        unit.append(&decoder_source(&decoder));
    }
    count
}

/// Encode string literals in every owned package of the workspace.
pub fn obfuscate_strings(set: &PackageSet, hasher: &dyn Hasher) -> ObfuscateResult<StringReport> {
    let records: Vec<&PackageRecord> = set.iter().filter(|r| r.is_owned()).collect();
    let mut units = load_units(&records)?;

    let mut report = StringReport::default();
    for (record, units) in records.iter().zip(units.iter_mut()) {
        for unit in units.iter_mut() {
            let n = encode_unit(unit, &record.import_path, hasher);
            if n > 0 {
                report.units += 1;
                report.literals += n;
            }
        }
    }
    write_units(units.iter().flatten())?;
    info!(literals = report.literals, units = report.units, "obfuscated strings");
    Ok(report)
}
