//! Runtime options for grids and solvers.
//!
//! `OptionsDb` is a flat `name -> value` store filled from a `-name value` argument list
//! (or programmatically). Lookups take an optional prefix that is spliced in after the
//! leading dash, so `get_option(Some("fine_"), "-da_grid_x")` reads `-fine_da_grid_x`.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::GtError;

/// Option store.
#[derive(Clone, Debug, Default)]
pub struct OptionsDb {
    values: HashMap<String, Option<String>>,
}

impl OptionsDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `-name [value]` pairs. A token following an option name is taken as its value
    /// unless it is itself an option name; numbers such as `-1e100` count as values.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut db = Self::new();
        let mut pending: Option<String> = None;
        for arg in args {
            let arg = arg.as_ref();
            if is_option_name(arg) {
                if let Some(name) = pending.take() {
                    db.values.insert(name, None);
                }
                pending = Some(arg.trim_start_matches('-').to_string());
            } else if let Some(name) = pending.take() {
                db.values.insert(name, Some(arg.to_string()));
            }
        }
        if let Some(name) = pending {
            db.values.insert(name, None);
        }
        db
    }

    /// Set (or overwrite) an option. `value` of `None` records a bare flag.
    pub fn set(&mut self, name: &str, value: Option<&str>) {
        self.values.insert(
            name.trim_start_matches('-').to_string(),
            value.map(str::to_string),
        );
    }

    fn key(prefix: Option<&str>, name: &str) -> String {
        format!("{}{}", prefix.unwrap_or(""), name.trim_start_matches('-'))
    }

    /// True if the option was given, with or without a value.
    pub fn has_name(&self, prefix: Option<&str>, name: &str) -> bool {
        self.values.contains_key(&Self::key(prefix, name))
    }

    /// Raw value of an option; `None` when absent or given as a bare flag.
    pub fn get_option(&self, prefix: Option<&str>, name: &str) -> Option<&str> {
        self.values
            .get(&Self::key(prefix, name))
            .and_then(|v| v.as_deref())
    }

    pub fn get_real(&self, prefix: Option<&str>, name: &str) -> Result<Option<f64>, GtError> {
        self.parsed(prefix, name)
    }

    pub fn get_int(&self, prefix: Option<&str>, name: &str) -> Result<Option<i64>, GtError> {
        self.parsed(prefix, name)
    }

    /// Like [`get_int`](Self::get_int) but rejects negative values.
    pub fn get_usize(&self, prefix: Option<&str>, name: &str) -> Result<Option<usize>, GtError> {
        self.parsed(prefix, name)
    }

    fn parsed<T: FromStr>(&self, prefix: Option<&str>, name: &str) -> Result<Option<T>, GtError> {
        match self.get_option(prefix, name) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| GtError::InvalidOption {
                name: Self::key(prefix, name),
                value: raw.to_string(),
            }),
        }
    }
}

fn is_option_name(arg: &str) -> bool {
    arg.len() > 1 && arg.starts_with('-') && arg.parse::<f64>().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_values() {
        let db = OptionsDb::from_args(["-da_grid_x", "16", "-tao_monitor", "-tao_fmin", "-1e100"]);
        assert_eq!(db.get_usize(None, "-da_grid_x").unwrap(), Some(16));
        assert!(db.has_name(None, "-tao_monitor"));
        assert_eq!(db.get_option(None, "tao_monitor"), None);
        assert_eq!(db.get_real(None, "-tao_fmin").unwrap(), Some(-1e100));
        assert_eq!(db.get_real(None, "-tao_fatol").unwrap(), None);
    }

    #[test]
    fn prefix_is_spliced_after_dash() {
        let mut db = OptionsDb::new();
        db.set("-fine_da_dof", Some("3"));
        assert_eq!(db.get_int(Some("fine_"), "-da_dof").unwrap(), Some(3));
        assert_eq!(db.get_int(None, "-da_dof").unwrap(), None);
    }

    #[test]
    fn bad_value_is_reported() {
        let db = OptionsDb::from_args(["-da_stencil_width", "-2"]);
        let err = db.get_usize(None, "-da_stencil_width").unwrap_err();
        assert!(matches!(err, GtError::InvalidOption { ref name, ref value }
            if name == "da_stencil_width" && value == "-2"));
    }
}
