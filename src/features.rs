//! Feature configuration as a read-only struct built at construction,
//! replacing the original's `B1_FEATURE_*` compile-time macros (design
//! notes, "Replacing global feature macros").

/// Immutable interpreter configuration, built once and consulted by the
/// tokenizer, evaluator and statement interpreter instead of re-deriving
/// behavior from conditional compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub has_single: bool,
    pub has_double: bool,
    pub has_small_ints: bool,
    pub has_hex: bool,
    /// `OPTION BASE` default lower bound when no `OPTION BASE` has executed.
    pub default_array_base: u8,
    pub max_array_dims: u8,
    pub max_fn_args: u8,
    /// Right-hand bound of the PRINT line; `0 < zone_width <= margin`.
    pub margin: u16,
    pub zone_width: u16,
    /// Whether identifiers hash to a 32-bit or 16-bit space (spec §4.2).
    pub hash32: bool,
}

impl Features {
    /// A configuration with both floating-point types and small integers
    /// enabled, matching what a desktop build of the original core would
    /// select.
    pub fn full() -> Self {
        Features {
            has_single: true,
            has_double: true,
            has_small_ints: true,
            has_hex: true,
            default_array_base: 0,
            max_array_dims: 3,
            max_fn_args: 7,
            margin: 80,
            zone_width: 16,
            hash32: true,
        }
    }

    /// A minimal configuration: INT32 and STRING only, no hex literals, one
    /// array dimension. Useful for exercising the `has_single == false` /
    /// `has_double == false` branches the original reaches via `#ifdef`.
    pub fn minimal() -> Self {
        Features {
            has_single: false,
            has_double: false,
            has_small_ints: false,
            has_hex: false,
            default_array_base: 0,
            max_array_dims: 1,
            max_fn_args: 3,
            margin: 80,
            zone_width: 16,
            hash32: true,
        }
    }

    pub fn has_fractional(&self) -> bool {
        self.has_single || self.has_double
    }

    /// The type used for math functions requiring the highest available
    /// float precision (`B1_TYPE_FP_HIGH_PREC`).
    pub fn high_precision_float(&self) -> crate::types::TypeTag {
        if self.has_double {
            crate::types::TypeTag::F64
        } else {
            crate::types::TypeTag::F32
        }
    }
}

impl Default for Features {
    fn default() -> Self {
        Features::full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_width_within_margin_by_default() {
        let f = Features::full();
        assert!(f.zone_width > 0 && f.zone_width <= f.margin);
    }

    #[test]
    fn minimal_disables_fractional_types() {
        let f = Features::minimal();
        assert!(!f.has_fractional());
    }
}
