//! Typed configuration, optionally read from an already-parsed parameter map.
//!
//! Parameter maps associate each key with one or more string values
//! (one per resolution level in a multi-resolution setting);
//! only the first value of each key is used here.
use std::{collections::BTreeMap, str::FromStr};

use crate::{
    ControlGrid, DEFAULT_SPLINE_ORDER, Error, InterpolatorKind, Result, SubTransformKind,
};

/// Already-parsed key/values parameter map.
pub type ParameterMap = BTreeMap<String, Vec<String>>;

/// Read the first value of `key`, if present.
fn get_first<T: FromStr>(map: &ParameterMap, key: &str) -> Result<Option<T>> {
    let Some(values) = map.get(key) else {
        return Ok(None);
    };
    let Some(value) = values.first() else {
        return Ok(None);
    };
    if values.len() > 1 {
        log::warn!("{key} has {} values, using the first", values.len());
    }
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| Error::invalid_parameter(key, format!("cannot parse {value:?}")))
}

/// Configuration of a [crate::StackTransform].
///
/// Geometry which cannot be expressed in a parameter map
/// (the B-spline control grid and the affine centre, in the sub-transform space)
/// is given directly.
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    /// Dimensionality of the stacked transform, including the stacking dimension.
    pub ndim: usize,
    pub kind: SubTransformKind,
    pub spline_order: u32,
    pub number_of_sub_transforms: usize,
    pub stack_origin: f64,
    pub stack_spacing: f64,
    pub grid: Option<ControlGrid>,
    pub center: Option<Vec<f64>>,
}

impl StackConfig {
    pub const KIND_KEY: &'static str = "StackTransform";
    pub const SPLINE_ORDER_KEY: &'static str = "BSplineTransformSplineOrder";
    pub const NUMBER_OF_SUB_TRANSFORMS_KEY: &'static str = "NumberOfSubTransforms";
    pub const STACK_ORIGIN_KEY: &'static str = "StackOrigin";
    pub const STACK_SPACING_KEY: &'static str = "StackSpacing";

    /// Default configuration for a stack of `number_of_sub_transforms` slices.
    pub fn new(ndim: usize, number_of_sub_transforms: usize) -> Self {
        Self {
            ndim,
            kind: SubTransformKind::default(),
            spline_order: DEFAULT_SPLINE_ORDER,
            number_of_sub_transforms,
            stack_origin: 0.0,
            stack_spacing: 1.0,
            grid: None,
            center: None,
        }
    }

    pub fn with_grid(mut self, grid: ControlGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn with_center(mut self, center: &[f64]) -> Self {
        self.center = Some(center.to_vec());
        self
    }

    /// Read configuration from a parameter map.
    ///
    /// `NumberOfSubTransforms` is required; other keys fall back to their defaults.
    /// Values are only parsed here; their domains are checked when the stack is built.
    pub fn from_parameter_map(ndim: usize, map: &ParameterMap) -> Result<Self> {
        let count = get_first(map, Self::NUMBER_OF_SUB_TRANSFORMS_KEY)?.ok_or_else(|| {
            Error::invalid_parameter(Self::NUMBER_OF_SUB_TRANSFORMS_KEY, "required")
        })?;
        let mut config = Self::new(ndim, count);
        if let Some(kind) = get_first(map, Self::KIND_KEY)? {
            config.kind = kind;
        }
        if let Some(order) = get_first(map, Self::SPLINE_ORDER_KEY)? {
            config.spline_order = order;
        }
        if let Some(origin) = get_first(map, Self::STACK_ORIGIN_KEY)? {
            config.stack_origin = origin;
        }
        if let Some(spacing) = get_first(map, Self::STACK_SPACING_KEY)? {
            config.stack_spacing = spacing;
        }
        log::debug!("Read stack configuration {config:?}");
        Ok(config)
    }
}

/// Configuration of a [crate::FeatureChannelRegistry].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureConfig {
    pub number_of_fixed_feature_images: usize,
    pub number_of_moving_feature_images: usize,
    /// Interpolator bound to channels which have an image but no interpolator.
    pub default_interpolator: InterpolatorKind,
    /// Only used by B-spline default interpolators.
    pub interpolator_spline_order: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            number_of_fixed_feature_images: 0,
            number_of_moving_feature_images: 0,
            default_interpolator: InterpolatorKind::default(),
            interpolator_spline_order: DEFAULT_SPLINE_ORDER,
        }
    }
}

impl FeatureConfig {
    pub const FIXED_COUNT_KEY: &'static str = "NumberOfFixedFeatureImages";
    pub const MOVING_COUNT_KEY: &'static str = "NumberOfMovingFeatureImages";
    pub const INTERPOLATOR_KEY: &'static str = "FeatureInterpolator";
    pub const SPLINE_ORDER_KEY: &'static str = "FeatureInterpolatorSplineOrder";

    /// Read configuration from a parameter map; every key is optional.
    pub fn from_parameter_map(map: &ParameterMap) -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = get_first(map, Self::FIXED_COUNT_KEY)? {
            config.number_of_fixed_feature_images = n;
        }
        if let Some(n) = get_first(map, Self::MOVING_COUNT_KEY)? {
            config.number_of_moving_feature_images = n;
        }
        if let Some(kind) = get_first(map, Self::INTERPOLATOR_KEY)? {
            config.default_interpolator = kind;
        }
        if let Some(order) = get_first(map, Self::SPLINE_ORDER_KEY)? {
            config.interpolator_spline_order = order;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureConfig, ParameterMap, StackConfig};
    use crate::{Error, InterpolatorKind, SubTransformKind};

    fn make_map(entries: &[(&str, &str)]) -> ParameterMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect()
    }

    #[test]
    fn test_stack_defaults() {
        let config =
            StackConfig::from_parameter_map(3, &make_map(&[("NumberOfSubTransforms", "5")]))
                .unwrap();
        assert_eq!(config, StackConfig::new(3, 5));
        assert_eq!(config.kind, SubTransformKind::BSpline);
        assert_eq!(config.spline_order, 3);
        assert_eq!(config.stack_origin, 0.0);
        assert_eq!(config.stack_spacing, 1.0);
    }

    #[test]
    fn test_stack_values() {
        let map = make_map(&[
            ("NumberOfSubTransforms", "4"),
            ("StackTransform", "AffineLogTransform"),
            ("BSplineTransformSplineOrder", "2"),
            ("StackOrigin", "-1.5"),
            ("StackSpacing", "0.25"),
        ]);
        let config = StackConfig::from_parameter_map(4, &map).unwrap();
        assert_eq!(config.number_of_sub_transforms, 4);
        assert_eq!(config.kind, SubTransformKind::AffineLog);
        assert_eq!(config.spline_order, 2);
        assert_eq!(config.stack_origin, -1.5);
        assert_eq!(config.stack_spacing, 0.25);
    }

    #[test]
    fn test_first_value_used() {
        let mut map = make_map(&[]);
        map.insert(
            "NumberOfSubTransforms".into(),
            vec!["6".into(), "9".into()],
        );
        let config = StackConfig::from_parameter_map(3, &map).unwrap();
        assert_eq!(config.number_of_sub_transforms, 6);
    }

    #[test]
    fn test_stack_required_and_malformed() {
        assert!(matches!(
            StackConfig::from_parameter_map(3, &make_map(&[])),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            StackConfig::from_parameter_map(
                3,
                &make_map(&[("NumberOfSubTransforms", "4"), ("StackTransform", "Rigid")])
            ),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            StackConfig::from_parameter_map(3, &make_map(&[("NumberOfSubTransforms", "four")])),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_feature_config() {
        assert_eq!(
            FeatureConfig::from_parameter_map(&make_map(&[])).unwrap(),
            FeatureConfig::default()
        );
        let map = make_map(&[
            ("NumberOfFixedFeatureImages", "2"),
            ("NumberOfMovingFeatureImages", "1"),
            ("FeatureInterpolator", "BSpline"),
            ("FeatureInterpolatorSplineOrder", "2"),
        ]);
        let config = FeatureConfig::from_parameter_map(&map).unwrap();
        assert_eq!(config.number_of_fixed_feature_images, 2);
        assert_eq!(config.number_of_moving_feature_images, 1);
        assert_eq!(config.default_interpolator, InterpolatorKind::BSpline);
        assert_eq!(config.interpolator_spline_order, 2);
    }
}
