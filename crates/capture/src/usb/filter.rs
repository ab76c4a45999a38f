//! VID:PID device filters

use common::DeviceSelector;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use types::DeviceIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error(
        "Invalid filter format '{0}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')"
    )]
    Format(String),

    #[error("Invalid {field} '{value}', expected 1-4 hex digits")]
    HexId { field: &'static str, value: String },
}

/// `VID:PID` pattern; `None` matches any id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn exact(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
    }

    fn parse_id(id: &str, field: &'static str) -> Result<Option<u16>, FilterError> {
        if id == "*" {
            return Ok(None);
        }

        let hex = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .unwrap_or(id);

        if hex.is_empty() || hex.len() > 4 {
            return Err(FilterError::HexId {
                field,
                value: id.to_string(),
            });
        }

        u16::from_str_radix(hex, 16)
            .map(Some)
            .map_err(|_| FilterError::HexId {
                field,
                value: id.to_string(),
            })
    }
}

impl FromStr for DeviceFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| FilterError::Format(s.to_string()))?;

        if pid.contains(':') {
            return Err(FilterError::Format(s.to_string()));
        }

        Ok(Self {
            vendor_id: Self::parse_id(vid, "VID")?,
            product_id: Self::parse_id(pid, "PID")?,
        })
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(vid) => write!(f, "0x{:04x}", vid)?,
            None => write!(f, "*")?,
        }
        match self.product_id {
            Some(pid) => write!(f, ":0x{:04x}", pid),
            None => write!(f, ":*"),
        }
    }
}

/// Whether a VID/PID pair passes the filters (no filters allows everything)
pub fn matches_any(filters: &[DeviceFilter], vendor_id: u16, product_id: u16) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(vendor_id, product_id))
}

/// User toggle picker: first candidate passing the filters
pub struct FilterSelector {
    filters: Vec<DeviceFilter>,
}

impl FilterSelector {
    pub fn new(filters: Vec<DeviceFilter>) -> Self {
        Self { filters }
    }
}

impl DeviceSelector for FilterSelector {
    fn select(&self, candidates: &[DeviceIdentity]) -> Option<DeviceIdentity> {
        candidates
            .iter()
            .find(|c| matches_any(&self.filters, c.vendor_id, c.product_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_identity, create_mock_identity_at};

    fn parse(filters: &[&str]) -> Vec<DeviceFilter> {
        filters.iter().map(|f| f.parse().unwrap()).collect()
    }

    #[test]
    fn test_filter_logic() {
        let filters = parse(&["0x1234:0x5678", "0xABCD:*"]);

        assert!(matches_any(&filters, 0x1234, 0x5678));

        assert!(matches_any(&filters, 0xABCD, 0x1111));
        assert!(matches_any(&filters, 0xABCD, 0x9999));

        assert!(!matches_any(&filters, 0x1234, 0x9999));
        assert!(!matches_any(&filters, 0x9999, 0x5678));
        assert!(!matches_any(&filters, 0x0000, 0x0000));

        assert!(matches_any(&[], 0x1234, 0x5678));
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "1234:5678".parse::<DeviceFilter>().unwrap(),
            DeviceFilter::exact(0x1234, 0x5678)
        );
        assert_eq!(
            "*:0X00ff".parse::<DeviceFilter>().unwrap(),
            DeviceFilter {
                vendor_id: None,
                product_id: Some(0x00ff)
            }
        );
        assert_eq!(
            "0xabcd:*".parse::<DeviceFilter>().unwrap().to_string(),
            "0xabcd:*"
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "0x1234".parse::<DeviceFilter>(),
            Err(FilterError::Format(_))
        ));
        assert!(matches!(
            "0x1234:0x5678:0x9".parse::<DeviceFilter>(),
            Err(FilterError::Format(_))
        ));
        assert!(matches!(
            "0x12345:*".parse::<DeviceFilter>(),
            Err(FilterError::HexId { field: "VID", .. })
        ));
        assert!(matches!(
            "0x1234:0xZZ".parse::<DeviceFilter>(),
            Err(FilterError::HexId { field: "PID", .. })
        ));
        assert!("0x:*".parse::<DeviceFilter>().is_err());
    }

    #[test]
    fn test_filter_selector() {
        let other = create_mock_identity_at(0x9999, 0x0001, "X", 1, 2);
        let wanted = create_mock_identity(0x1234, 0x5678, "SN1");
        let candidates = vec![other.clone(), wanted.clone()];

        let selector = FilterSelector::new(parse(&["0x1234:*"]));
        assert_eq!(selector.select(&candidates), Some(wanted));

        let any = FilterSelector::new(Vec::new());
        assert_eq!(any.select(&candidates), Some(other));

        let none = FilterSelector::new(parse(&["0x0001:0x0001"]));
        assert_eq!(none.select(&candidates), None);
    }
}
