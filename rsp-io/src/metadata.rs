//! RPC metadata in the GDAL key/value layout

use std::collections::HashMap;

use rsp_core::sensor::RpcCoefficients;

use crate::error::{IoError, Result};

/// Parse a GDAL-style `*_RPC.TXT` file body.
///
/// Each line is `KEY: value [unit]`; blank lines and unknown keys are
/// ignored.
pub fn rpc_from_text(text: &str) -> Result<RpcCoefficients> {
    let mut metadata = HashMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Some(value) = value.split_whitespace().next() else {
            continue;
        };
        metadata.insert(key.trim().to_string(), value.to_string());
    }
    rpc_from_map(&metadata)
}

/// Build RPC coefficients from GDAL's `RPC` metadata domain keys
pub fn rpc_from_map(metadata: &HashMap<String, String>) -> Result<RpcCoefficients> {
    Ok(RpcCoefficients {
        line_num_coeff: parse_coeff_array(metadata, "LINE_NUM_COEFF")?,
        line_den_coeff: parse_coeff_array(metadata, "LINE_DEN_COEFF")?,
        samp_num_coeff: parse_coeff_array(metadata, "SAMP_NUM_COEFF")?,
        samp_den_coeff: parse_coeff_array(metadata, "SAMP_DEN_COEFF")?,

        lat_off: parse_single(metadata, "LAT_OFF")?,
        lat_scale: parse_single(metadata, "LAT_SCALE")?,
        lon_off: parse_single(metadata, "LONG_OFF")?,
        lon_scale: parse_single(metadata, "LONG_SCALE")?,
        height_off: parse_single(metadata, "HEIGHT_OFF")?,
        height_scale: parse_single(metadata, "HEIGHT_SCALE")?,
        line_off: parse_single(metadata, "LINE_OFF")?,
        line_scale: parse_single(metadata, "LINE_SCALE")?,
        samp_off: parse_single(metadata, "SAMP_OFF")?,
        samp_scale: parse_single(metadata, "SAMP_SCALE")?,
    })
}

/// RPC metadata embedded in a GDAL dataset
#[cfg(feature = "gdal")]
pub fn rpc_from_dataset(dataset: &gdal::Dataset) -> Result<RpcCoefficients> {
    use gdal::Metadata;

    let entries = dataset
        .metadata_domain("RPC")
        .ok_or_else(|| IoError::Parse("RPC metadata not found".to_string()))?;
    let metadata = entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    rpc_from_map(&metadata)
}

fn parse_coeff_array(metadata: &HashMap<String, String>, prefix: &str) -> Result<[f64; 20]> {
    let mut coeffs = [0.0; 20];

    for (i, coeff) in coeffs.iter_mut().enumerate() {
        let key = format!("{}_{}", prefix, i + 1);
        *coeff = parse_single(metadata, &key)?;
    }

    Ok(coeffs)
}

fn parse_single(metadata: &HashMap<String, String>, key: &str) -> Result<f64> {
    let value = metadata
        .get(key)
        .ok_or_else(|| IoError::Parse(format!("Missing RPC parameter: {}", key)))?;

    value
        .trim()
        .parse()
        .map_err(|_| IoError::Parse(format!("Failed to parse RPC parameter {}: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Identity-like RPC text: sample follows longitude, line follows latitude
    fn sample_rpc_text() -> String {
        let mut text = String::from(
            "LINE_OFF: 500.0 pixels\n\
             SAMP_OFF: 500.0 pixels\n\
             LAT_OFF: 10.0 degrees\n\
             LONG_OFF: 20.0 degrees\n\
             HEIGHT_OFF: 0.0 meters\n\
             LINE_SCALE: 500.0 pixels\n\
             SAMP_SCALE: 500.0 pixels\n\
             LAT_SCALE: 0.1 degrees\n\
             LONG_SCALE: 0.1 degrees\n\
             HEIGHT_SCALE: 500.0 meters\n",
        );
        for prefix in ["LINE_NUM_COEFF", "LINE_DEN_COEFF", "SAMP_NUM_COEFF", "SAMP_DEN_COEFF"] {
            for i in 1..=20 {
                let value = match (prefix, i) {
                    ("LINE_DEN_COEFF" | "SAMP_DEN_COEFF", 1) => 1.0,
                    ("SAMP_NUM_COEFF", 2) => 1.0,
                    ("LINE_NUM_COEFF", 3) => -1.0,
                    _ => 0.0,
                };
                text.push_str(&format!("{prefix}_{i}: {value:+.6E}\n"));
            }
        }
        text
    }

    #[test]
    fn test_rpc_text_parses_units_and_coefficients() {
        let rpc = rpc_from_text(&sample_rpc_text()).unwrap();
        assert_eq!(rpc.line_off, 500.0);
        assert_eq!(rpc.lon_off, 20.0);
        assert_eq!(rpc.height_scale, 500.0);
        assert_eq!(rpc.samp_num_coeff[1], 1.0);
        assert_eq!(rpc.line_num_coeff[2], -1.0);
        assert_eq!(rpc.line_den_coeff[0], 1.0);
        assert_eq!(rpc.line_den_coeff[19], 0.0);
    }

    #[test]
    fn test_missing_key_is_reported() {
        let text = sample_rpc_text().replace("LAT_SCALE", "LAT_SKALE");
        let err = rpc_from_text(&text).unwrap_err();
        assert!(err.to_string().contains("LAT_SCALE"));
    }

    #[test]
    fn test_bad_number_is_reported() {
        let text = sample_rpc_text().replace("LINE_OFF: 500.0", "LINE_OFF: five");
        assert!(matches!(rpc_from_text(&text), Err(IoError::Parse(_))));
    }
}
