use crate::context::LoopProfile;
use crate::error::{Error, ListingError, Result};
use crate::support::diagnostic::{DiagnosticContext, Remark};
use json::JsonValue;
use std::fs;

/// Reads per-loop coverage and iteration counts. Malformed entries are reported and skipped.
pub fn load_profile(file: &str, diag: &DiagnosticContext) -> Result<Vec<LoopProfile>> {
    let data = fs::read_to_string(file)?;
    parse_profile(data.as_str(), diag)
}

pub fn parse_profile(data: &str, diag: &DiagnosticContext) -> Result<Vec<LoopProfile>> {
    let d = json::parse(data).map_err(|json_err| {
        diag.record(Remark::listing(
            ListingError::InvalidJson.into(),
            Some(json_err.to_string()),
        ));
        Error::ListingError(ListingError::InvalidJson)
    })?;
    let loops = match &d["loops"] {
        JsonValue::Array(loops) => loops,
        _ => return Err(ListingError::MissingField("loops").into()),
    };
    let mut ret = vec![];
    for l in loops {
        match parse_loop(l) {
            Ok(p) => ret.push(p),
            Err(e) => diag.record(Remark::listing(e.into(), Some(l.dump()))),
        }
    }
    Ok(ret)
}

fn parse_loop(v: &JsonValue) -> std::result::Result<LoopProfile, ListingError> {
    Ok(LoopProfile {
        id: v["id"].as_usize().ok_or(ListingError::MissingField("id"))?,
        coverage: v["coverage"].as_f64().ok_or(ListingError::MissingField("coverage"))?,
        invocations: v["invocations"].as_u64().unwrap_or(0),
        iterations: v["iterations"].as_u64().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile() {
        let diag = DiagnosticContext::default();
        let p = parse_profile(
            r#"{"loops": [
                {"id": 0, "coverage": 42.5, "invocations": 3, "iterations": 300},
                {"id": 1, "coverage": 0.2},
                {"coverage": 7}
            ]}"#,
            &diag,
        )
        .expect("profile");
        assert_eq!(2, p.len());
        assert_eq!(100.0, p[0].average_iterations());
        assert_eq!(0.0, p[1].average_iterations());
        assert_eq!(1, diag.len());
    }
}
