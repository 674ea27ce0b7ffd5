//! Construction of stack transforms and metrics by component name.
use std::{fmt, str::FromStr};

use crate::{
    Error, FeatureAugmentedMetric, FeatureChannelRegistry, FeatureConfig, MetricConfig, Result,
    StackConfig, StackTransform, SubTransformKind,
};

/// Names under which components are registered with a host registration framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentName {
    AffineLogStackTransform,
    TranslationStackTransform,
    BSplineStackTransform,
    ImageToImageMetricWithFeatures,
}

impl ComponentName {
    pub const ALL: [ComponentName; 4] = [
        ComponentName::AffineLogStackTransform,
        ComponentName::TranslationStackTransform,
        ComponentName::BSplineStackTransform,
        ComponentName::ImageToImageMetricWithFeatures,
    ];

    /// The sub-transform kind of a stack transform component, or `None` for the metric.
    pub fn stack_kind(&self) -> Option<SubTransformKind> {
        match self {
            ComponentName::AffineLogStackTransform => Some(SubTransformKind::AffineLog),
            ComponentName::TranslationStackTransform => Some(SubTransformKind::Translation),
            ComponentName::BSplineStackTransform => Some(SubTransformKind::BSpline),
            ComponentName::ImageToImageMetricWithFeatures => None,
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentName::AffineLogStackTransform => "AffineLogStackTransform",
            ComponentName::TranslationStackTransform => "TranslationStackTransform",
            ComponentName::BSplineStackTransform => "BSplineStackTransform",
            ComponentName::ImageToImageMetricWithFeatures => "ImageToImageMetricWithFeatures",
        };
        f.write_str(name)
    }
}

impl FromStr for ComponentName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.to_string() == s)
            .ok_or_else(|| Error::UnknownComponent(s.to_string()))
    }
}

/// Build the named stack transform.
///
/// The sub-transform kind is taken from the name, overriding `config.kind`.
/// Names which are not stack transforms are [Error::UnknownComponent].
pub fn create_stack_transform(name: &str, config: &StackConfig) -> Result<StackTransform> {
    let component: ComponentName = name.parse()?;
    let Some(kind) = component.stack_kind() else {
        return Err(Error::UnknownComponent(name.to_string()));
    };
    let config = StackConfig {
        kind,
        ..config.clone()
    };
    log::debug!("Creating {component} with {} sub-transforms", config.number_of_sub_transforms);
    StackTransform::new(&config)
}

/// Build the named metric with empty feature channels.
///
/// Names which are not metrics are [Error::UnknownComponent].
pub fn create_metric(
    name: &str,
    features: &FeatureConfig,
    config: MetricConfig,
) -> Result<FeatureAugmentedMetric> {
    let component: ComponentName = name.parse()?;
    if component != ComponentName::ImageToImageMetricWithFeatures {
        return Err(Error::UnknownComponent(name.to_string()));
    }
    Ok(FeatureAugmentedMetric::new(
        FeatureChannelRegistry::new(features),
        config,
    ))
}

#[cfg(test)]
mod tests {
    use super::{ComponentName, create_metric, create_stack_transform};
    use crate::{
        Error, FeatureConfig, MetricConfig, ParametricTransform, StackConfig, SubTransformKind,
        Transformation,
    };

    #[test]
    fn test_names_roundtrip() {
        for c in ComponentName::ALL {
            assert_eq!(c.to_string().parse::<ComponentName>().unwrap(), c);
        }
        assert!(matches!(
            "StackTransform".parse::<ComponentName>(),
            Err(Error::UnknownComponent(_))
        ));
    }

    #[test]
    fn test_create_stack_transform_uses_named_kind() {
        let config = StackConfig::new(3, 4);
        let stack = create_stack_transform("TranslationStackTransform", &config).unwrap();
        assert_eq!(stack.kind(), SubTransformKind::Translation);
        assert_eq!(stack.number_of_sub_transforms(), 4);
        assert_eq!(stack.number_of_parameters(), 8);
        assert!(stack.is_identity());

        let stack = create_stack_transform("AffineLogStackTransform", &config).unwrap();
        assert_eq!(stack.kind(), SubTransformKind::AffineLog);
        assert_eq!(stack.number_of_parameters(), 4 * 6);
    }

    #[test]
    fn test_create_bspline_stack_needs_grid() {
        let config = StackConfig::new(3, 2);
        assert!(matches!(
            create_stack_transform("BSplineStackTransform", &config),
            Err(Error::MissingControlGrid)
        ));
    }

    #[test]
    fn test_wrong_component_category() {
        let config = StackConfig::new(3, 2);
        assert!(matches!(
            create_stack_transform("ImageToImageMetricWithFeatures", &config),
            Err(Error::UnknownComponent(_))
        ));
        assert!(matches!(
            create_metric(
                "TranslationStackTransform",
                &FeatureConfig::default(),
                MetricConfig::default()
            ),
            Err(Error::UnknownComponent(_))
        ));
    }

    #[test]
    fn test_create_metric() {
        let features = FeatureConfig {
            number_of_fixed_feature_images: 2,
            number_of_moving_feature_images: 3,
            ..Default::default()
        };
        let config = MetricConfig {
            compute_derivatives: true,
        };
        let metric = create_metric("ImageToImageMetricWithFeatures", &features, config).unwrap();
        assert_eq!(metric.registry().number_of_fixed_feature_images(), 2);
        assert_eq!(metric.registry().number_of_moving_feature_images(), 3);
        assert_eq!(metric.config(), &config);
        assert!(!metric.registry().is_initialized());
    }
}
