//! Per-sample orchestration of feature channels for an image similarity metric.
//!
//! The metric maps each fixed sample point through the transform,
//! samples every fixed feature channel at the fixed point and every moving channel at the mapped point,
//! and hands the results to a [FeatureSimilarity] which turns them into a score.
use smallvec::smallvec;

use crate::{
    Error, FeatureChannelRegistry, ParametricTransform, Result, ShortVec, Side, SparseJacobian,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricConfig {
    /// Also compute transform Jacobians, moving feature gradients and parameter gradients.
    pub compute_derivatives: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelValue {
    pub value: f64,
    /// Spatial gradient of the feature at the sampled point,
    /// for moving channels with a continuous derivative when derivatives are computed.
    pub gradient: Option<ShortVec<f64>>,
    /// `gradient * J` for the transform Jacobian `J`,
    /// one value per entry of [SparseJacobian::indices].
    pub parameter_gradient: Option<Vec<f64>>,
}

/// Result of sampling one feature channel at one point.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSample {
    /// The channel has no image.
    Skipped,
    /// The point is outside the channel's image.
    Outside,
    Sampled(ChannelValue),
}

impl ChannelSample {
    pub fn value(&self) -> Option<f64> {
        match self {
            ChannelSample::Sampled(v) => Some(v.value),
            _ => None,
        }
    }
}

/// Every feature channel sampled for one fixed point.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSample {
    pub fixed_point: ShortVec<f64>,
    /// The fixed point mapped through the transform.
    pub mapped_point: ShortVec<f64>,
    pub fixed: Vec<ChannelSample>,
    pub moving: Vec<ChannelSample>,
    /// Parameter Jacobian of the transform at the fixed point, when derivatives are computed.
    pub jacobian: Option<SparseJacobian>,
}

/// A similarity measure computed from feature samples.
pub trait FeatureSimilarity {
    /// Called before the samples of one evaluation.
    fn begin(&mut self, number_of_parameters: usize) {
        let _ = number_of_parameters;
    }

    fn accumulate(&mut self, sample: &FeatureSample);

    /// The similarity over every sample accumulated since [FeatureSimilarity::begin].
    fn finish(&mut self) -> f64;
}

/// Samples fixed and moving feature channels for a similarity metric.
#[derive(Debug, Clone, Default)]
pub struct FeatureAugmentedMetric {
    registry: FeatureChannelRegistry,
    config: MetricConfig,
}

impl FeatureAugmentedMetric {
    pub fn new(registry: FeatureChannelRegistry, config: MetricConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &FeatureChannelRegistry {
        &self.registry
    }

    /// Mutable access to the channels; any change requires initialising again.
    pub fn registry_mut(&mut self) -> &mut FeatureChannelRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MetricConfig) {
        self.config = config;
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.registry.initialize()
    }

    fn check_dimensions<T: ParametricTransform + ?Sized>(&self, transform: &T) -> Result<()> {
        if !self.registry.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let channel_dims = [
            (self.registry.channels(Side::Fixed), transform.input_ndim()),
            (self.registry.channels(Side::Moving), transform.output_ndim()),
        ];
        for (channels, expected) in channel_dims {
            for idx in 0..channels.len() {
                if let Some(image) = channels.image(idx)
                    && image.ndim() != expected
                {
                    return Err(Error::DimensionMismatch {
                        expected,
                        got: image.ndim(),
                    });
                }
            }
        }
        Ok(())
    }

    fn evaluate_point<T: ParametricTransform + ?Sized>(&self, transform: &T, pt: &[f64]) -> FeatureSample {
        let mut mapped: ShortVec<f64> = smallvec![f64::NAN; transform.output_ndim()];
        transform.transform_into(pt, &mut mapped);

        let fixed_channels = self.registry.channels(Side::Fixed);
        let fixed = (0..fixed_channels.len())
            .map(|idx| {
                let (Some(_), Some(interp)) =
                    (fixed_channels.image(idx), fixed_channels.interpolator(idx))
                else {
                    return ChannelSample::Skipped;
                };
                match interp.evaluate(pt) {
                    Some(value) => ChannelSample::Sampled(ChannelValue {
                        value,
                        gradient: None,
                        parameter_gradient: None,
                    }),
                    None => ChannelSample::Outside,
                }
            })
            .collect();

        let jacobian = self
            .config
            .compute_derivatives
            .then(|| transform.jacobian(pt));

        let moving_channels = self.registry.channels(Side::Moving);
        let moving = (0..moving_channels.len())
            .map(|idx| {
                let (Some(_), Some(interp)) =
                    (moving_channels.image(idx), moving_channels.interpolator(idx))
                else {
                    return ChannelSample::Skipped;
                };
                let derivative = self.registry.moving_derivative(idx);
                match (&jacobian, derivative) {
                    (Some(jac), Some(derivative)) => {
                        let mut gradient: ShortVec<f64> = smallvec![0.0; mapped.len()];
                        match derivative.evaluate_with_gradient(&mapped, &mut gradient) {
                            Some(value) => {
                                let parameter_gradient = Some(jac.left_multiply(&gradient));
                                ChannelSample::Sampled(ChannelValue {
                                    value,
                                    gradient: Some(gradient),
                                    parameter_gradient,
                                })
                            }
                            None => ChannelSample::Outside,
                        }
                    }
                    _ => match interp.evaluate(&mapped) {
                        Some(value) => ChannelSample::Sampled(ChannelValue {
                            value,
                            gradient: None,
                            parameter_gradient: None,
                        }),
                        None => ChannelSample::Outside,
                    },
                }
            })
            .collect();

        FeatureSample {
            fixed_point: pt.iter().copied().collect(),
            mapped_point: mapped,
            fixed,
            moving,
            jacobian,
        }
    }

    /// Sample every feature channel for every fixed point, in order.
    pub fn evaluate<T, P>(&self, transform: &T, points: &[P]) -> Result<Vec<FeatureSample>>
    where
        T: ParametricTransform + ?Sized,
        P: AsRef<[f64]> + Sync,
    {
        self.check_dimensions(transform)?;
        let ndim = transform.input_ndim();
        if let Some(p) = points.iter().find(|p| p.as_ref().len() != ndim) {
            return Err(Error::DimensionMismatch {
                expected: ndim,
                got: p.as_ref().len(),
            });
        }

        #[cfg(feature = "rayon")]
        let samples = {
            use rayon::prelude::*;
            points
                .par_iter()
                .map(|p| self.evaluate_point(transform, p.as_ref()))
                .collect()
        };
        #[cfg(not(feature = "rayon"))]
        let samples = points
            .iter()
            .map(|p| self.evaluate_point(transform, p.as_ref()))
            .collect();

        Ok(samples)
    }

    /// Evaluate `similarity` over the samples at every fixed point.
    pub fn evaluate_with<T, P, S>(&self, transform: &T, points: &[P], similarity: &mut S) -> Result<f64>
    where
        T: ParametricTransform + ?Sized,
        P: AsRef<[f64]> + Sync,
        S: FeatureSimilarity + ?Sized,
    {
        let samples = self.evaluate(transform, points)?;
        similarity.begin(transform.number_of_parameters());
        for sample in samples.iter() {
            similarity.accumulate(sample);
        }
        Ok(similarity.finish())
    }
}
