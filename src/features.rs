//! Auxiliary feature images sampled by a metric alongside the primary images.
use std::sync::Arc;

use crate::{
    ContinuousDerivative, Error, FeatureConfig, FeatureImage, Interpolator, InterpolatorKind,
    Result,
    error::check_index,
    interpolate::{PendingDecomposition, dispatch_decomposition},
};

/// Which image of the registration pair a feature channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Fixed,
    Moving,
}

/// Index-aligned feature images and their interpolators, for one side.
///
/// Both lists always have the same length.
#[derive(Debug, Clone, Default)]
pub struct FeatureChannels {
    images: Vec<Option<Arc<FeatureImage>>>,
    interpolators: Vec<Option<Arc<dyn Interpolator>>>,
}

impl FeatureChannels {
    /// `count` empty channels.
    pub fn new(count: usize) -> Self {
        let mut out = Self::default();
        out.resize(count);
        out
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Change the number of channels.
    ///
    /// Channels below the new count are kept; new channels are empty.
    /// Channels beyond the new count are discarded.
    pub fn resize(&mut self, count: usize) {
        let discarded = self.images.iter().skip(count).filter(|i| i.is_some()).count();
        if discarded > 0 {
            log::warn!("Discarding {discarded} feature images beyond channel count {count}");
        }
        self.images.resize(count, None);
        self.interpolators.resize(count, None);
    }

    pub fn set_image(&mut self, idx: usize, image: Arc<FeatureImage>) -> Result<()> {
        check_index(idx, self.len())?;
        self.images[idx] = Some(image);
        Ok(())
    }

    pub fn set_interpolator(&mut self, idx: usize, interpolator: Arc<dyn Interpolator>) -> Result<()> {
        check_index(idx, self.len())?;
        self.interpolators[idx] = Some(interpolator);
        Ok(())
    }

    /// `None` if the channel is unset or does not exist.
    pub fn image(&self, idx: usize) -> Option<&Arc<FeatureImage>> {
        self.images.get(idx)?.as_ref()
    }

    /// `None` if the channel has no interpolator or does not exist.
    pub fn interpolator(&self, idx: usize) -> Option<&Arc<dyn Interpolator>> {
        self.interpolators.get(idx)?.as_ref()
    }

    /// Channels which have an image, with their interpolators.
    fn bound(&self) -> impl Iterator<Item = (usize, &Arc<FeatureImage>, Option<&Arc<dyn Interpolator>>)> {
        self.images
            .iter()
            .zip(self.interpolators.iter())
            .enumerate()
            .filter_map(|(idx, (im, interp))| Some((idx, im.as_ref()?, interp.as_ref())))
    }

    /// Check that every channel with an image has an interpolator bound to that image.
    fn validate(&self) -> Result<()> {
        for (channel, image, interp) in self.bound() {
            let Some(interp) = interp else {
                return Err(Error::MissingInterpolator { channel });
            };
            if !Arc::ptr_eq(interp.image(), image) {
                return Err(Error::InterpolatorImageMismatch { channel });
            }
            if interp.ndim() != image.ndim() {
                return Err(Error::DimensionMismatch {
                    expected: image.ndim(),
                    got: interp.ndim(),
                });
            }
        }
        Ok(())
    }
}

/// A default interpolator which may still be computing.
enum PendingInterpolator {
    Ready(Arc<dyn Interpolator>),
    Decomposing(PendingDecomposition),
}

impl PendingInterpolator {
    fn wait(self) -> Result<Arc<dyn Interpolator>> {
        match self {
            PendingInterpolator::Ready(interp) => Ok(interp),
            PendingInterpolator::Decomposing(pending) => Ok(Arc::new(pending.wait()?)),
        }
    }
}

/// A default interpolator to bind to one channel.
struct PendingDefault {
    side: Side,
    channel: usize,
    interpolator: PendingInterpolator,
}

/// Queue default interpolators for every channel which has an image but no interpolator.
///
/// B-spline interpolators are dispatched here but not waited on.
/// On error, everything queued before the failure stays in `pending`.
fn dispatch_defaults(
    side: Side,
    channels: &FeatureChannels,
    kind: InterpolatorKind,
    spline_order: u32,
    pending: &mut Vec<PendingDefault>,
) -> Result<()> {
    for (channel, image, interp) in channels.bound() {
        if interp.is_some() {
            continue;
        }
        let interpolator = match kind {
            InterpolatorKind::BSpline => PendingInterpolator::Decomposing(dispatch_decomposition(
                image.clone(),
                spline_order,
            )?),
            other => PendingInterpolator::Ready(other.create(image.clone(), spline_order)?),
        };
        pending.push(PendingDefault {
            side,
            channel,
            interpolator,
        });
    }
    Ok(())
}

/// Wait for every pending default, including those after a failure.
///
/// Returns the first failure, if any.
fn wait_all(pending: Vec<PendingDefault>) -> Result<Vec<(Side, usize, Arc<dyn Interpolator>)>> {
    let mut ready = Vec::with_capacity(pending.len());
    let mut first_error = None;
    for p in pending {
        match p.interpolator.wait() {
            Ok(interp) => ready.push((p.side, p.channel, interp)),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(ready),
    }
}

#[derive(Debug, Clone)]
struct Initialized {
    /// Per moving channel, the interpolator's derivative fast path if it has one.
    moving_derivatives: Vec<Option<Arc<dyn ContinuousDerivative>>>,
}

/// Fixed and moving feature channels of a metric.
///
/// Channels are configured, then [FeatureChannelRegistry::initialize]d;
/// any later change to the channels requires initialising again.
#[derive(Debug, Clone)]
pub struct FeatureChannelRegistry {
    default_interpolator: InterpolatorKind,
    spline_order: u32,
    fixed: FeatureChannels,
    moving: FeatureChannels,
    initialized: Option<Initialized>,
}

impl Default for FeatureChannelRegistry {
    fn default() -> Self {
        Self::new(&FeatureConfig::default())
    }
}

impl FeatureChannelRegistry {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            default_interpolator: config.default_interpolator,
            spline_order: config.interpolator_spline_order,
            fixed: FeatureChannels::new(config.number_of_fixed_feature_images),
            moving: FeatureChannels::new(config.number_of_moving_feature_images),
            initialized: None,
        }
    }

    /// Interpolator bound at initialisation to channels with an image but no interpolator.
    pub fn set_default_interpolator(&mut self, kind: InterpolatorKind, spline_order: u32) {
        self.default_interpolator = kind;
        self.spline_order = spline_order;
        self.initialized = None;
    }

    pub fn default_interpolator(&self) -> (InterpolatorKind, u32) {
        (self.default_interpolator, self.spline_order)
    }

    pub fn channels(&self, side: Side) -> &FeatureChannels {
        match side {
            Side::Fixed => &self.fixed,
            Side::Moving => &self.moving,
        }
    }

    fn channels_mut(&mut self, side: Side) -> &mut FeatureChannels {
        self.initialized = None;
        match side {
            Side::Fixed => &mut self.fixed,
            Side::Moving => &mut self.moving,
        }
    }

    pub fn set_number_of_feature_images(&mut self, side: Side, count: usize) {
        self.channels_mut(side).resize(count);
    }

    pub fn set_feature_image(&mut self, side: Side, idx: usize, image: Arc<FeatureImage>) -> Result<()> {
        check_index(idx, self.channels(side).len())?;
        self.channels_mut(side).set_image(idx, image)
    }

    pub fn set_feature_interpolator(
        &mut self,
        side: Side,
        idx: usize,
        interpolator: Arc<dyn Interpolator>,
    ) -> Result<()> {
        check_index(idx, self.channels(side).len())?;
        self.channels_mut(side).set_interpolator(idx, interpolator)
    }

    pub fn number_of_fixed_feature_images(&self) -> usize {
        self.fixed.len()
    }

    pub fn set_number_of_fixed_feature_images(&mut self, count: usize) {
        self.set_number_of_feature_images(Side::Fixed, count);
    }

    pub fn set_fixed_feature_image(&mut self, idx: usize, image: Arc<FeatureImage>) -> Result<()> {
        self.set_feature_image(Side::Fixed, idx, image)
    }

    /// Set the image of channel 0.
    pub fn set_fixed_primary_feature_image(&mut self, image: Arc<FeatureImage>) -> Result<()> {
        self.set_fixed_feature_image(0, image)
    }

    pub fn fixed_feature_image(&self, idx: usize) -> Option<&Arc<FeatureImage>> {
        self.fixed.image(idx)
    }

    pub fn set_fixed_feature_interpolator(
        &mut self,
        idx: usize,
        interpolator: Arc<dyn Interpolator>,
    ) -> Result<()> {
        self.set_feature_interpolator(Side::Fixed, idx, interpolator)
    }

    /// Set the interpolator of channel 0.
    pub fn set_fixed_primary_feature_interpolator(
        &mut self,
        interpolator: Arc<dyn Interpolator>,
    ) -> Result<()> {
        self.set_fixed_feature_interpolator(0, interpolator)
    }

    pub fn fixed_feature_interpolator(&self, idx: usize) -> Option<&Arc<dyn Interpolator>> {
        self.fixed.interpolator(idx)
    }

    pub fn number_of_moving_feature_images(&self) -> usize {
        self.moving.len()
    }

    pub fn set_number_of_moving_feature_images(&mut self, count: usize) {
        self.set_number_of_feature_images(Side::Moving, count);
    }

    pub fn set_moving_feature_image(&mut self, idx: usize, image: Arc<FeatureImage>) -> Result<()> {
        self.set_feature_image(Side::Moving, idx, image)
    }

    /// Set the image of channel 0.
    pub fn set_moving_primary_feature_image(&mut self, image: Arc<FeatureImage>) -> Result<()> {
        self.set_moving_feature_image(0, image)
    }

    pub fn moving_feature_image(&self, idx: usize) -> Option<&Arc<FeatureImage>> {
        self.moving.image(idx)
    }

    pub fn set_moving_feature_interpolator(
        &mut self,
        idx: usize,
        interpolator: Arc<dyn Interpolator>,
    ) -> Result<()> {
        self.set_feature_interpolator(Side::Moving, idx, interpolator)
    }

    /// Set the interpolator of channel 0.
    pub fn set_moving_primary_feature_interpolator(
        &mut self,
        interpolator: Arc<dyn Interpolator>,
    ) -> Result<()> {
        self.set_moving_feature_interpolator(0, interpolator)
    }

    pub fn moving_feature_interpolator(&self, idx: usize) -> Option<&Arc<dyn Interpolator>> {
        self.moving.interpolator(idx)
    }

    /// Bind default interpolators, check every channel, and cache derivative capabilities.
    ///
    /// All B-spline decompositions are started before any is waited on,
    /// and all have finished when this returns.
    /// On error the registry is unchanged.
    pub fn initialize(&mut self) -> Result<()> {
        let kind = self.default_interpolator;
        let order = self.spline_order;
        let mut pending = Vec::new();
        let dispatched = dispatch_defaults(Side::Fixed, &self.fixed, kind, order, &mut pending)
            .and_then(|_| dispatch_defaults(Side::Moving, &self.moving, kind, order, &mut pending));
        log::debug!("Binding {} default {kind} interpolators", pending.len());
        let ready = wait_all(pending);
        dispatched?;

        let mut fixed = self.fixed.clone();
        let mut moving = self.moving.clone();
        for (side, channel, interp) in ready? {
            let channels = match side {
                Side::Fixed => &mut fixed,
                Side::Moving => &mut moving,
            };
            channels.interpolators[channel] = Some(interp);
        }
        fixed.validate()?;
        moving.validate()?;

        let moving_derivatives: Vec<_> = moving
            .interpolators
            .iter()
            .map(|interp| interp.clone()?.continuous_derivative())
            .collect();
        log::debug!(
            "Moving feature channels with continuous derivatives: {:?}",
            moving_derivatives
                .iter()
                .map(|d| d.is_some())
                .collect::<Vec<_>>()
        );

        self.fixed = fixed;
        self.moving = moving;
        self.initialized = Some(Initialized { moving_derivatives });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.is_some()
    }

    /// Per moving channel, whether its interpolator provides a continuous derivative.
    ///
    /// `None` before initialisation.
    pub fn moving_derivative_flags(&self) -> Option<Vec<bool>> {
        let state = self.initialized.as_ref()?;
        Some(state.moving_derivatives.iter().map(|d| d.is_some()).collect())
    }

    /// Derivative fast path of a moving channel, after initialisation.
    pub fn moving_derivative(&self, idx: usize) -> Option<&Arc<dyn ContinuousDerivative>> {
        self.initialized
            .as_ref()?
            .moving_derivatives
            .get(idx)?
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::{ArrayD, IxDyn};

    use super::{FeatureChannelRegistry, Side};
    use crate::interpolate::{LinearInterpolator, NearestNeighbourInterpolator, test_images};
    use crate::{Error, FeatureConfig, FeatureImage, Interpolator, InterpolatorKind};

    fn make_registry(fixed: usize, moving: usize) -> FeatureChannelRegistry {
        FeatureChannelRegistry::new(&FeatureConfig {
            number_of_fixed_feature_images: fixed,
            number_of_moving_feature_images: moving,
            ..Default::default()
        })
    }

    #[test]
    fn test_fixed_set_get() {
        let mut reg = make_registry(3, 0);
        let image = test_images::smooth_2d();
        reg.set_fixed_feature_image(1, image.clone()).unwrap();
        assert!(reg.fixed_feature_image(0).is_none());
        assert!(Arc::ptr_eq(reg.fixed_feature_image(1).unwrap(), &image));
        assert!(reg.fixed_feature_image(2).is_none());

        assert!(matches!(
            reg.set_fixed_feature_image(5, test_images::linear_2d()),
            Err(Error::IndexOutOfRange { index: 5, len: 3 })
        ));
        assert_eq!(reg.number_of_fixed_feature_images(), 3);
        assert!(reg.fixed_feature_image(0).is_none());
        assert!(Arc::ptr_eq(reg.fixed_feature_image(1).unwrap(), &image));
        assert!(reg.fixed_feature_image(2).is_none());
        assert!(reg.fixed_feature_image(5).is_none());
    }

    #[test]
    fn test_primary_shorthands() {
        let mut reg = make_registry(0, 0);
        let image = test_images::smooth_2d();
        assert!(reg.set_moving_primary_feature_image(image.clone()).is_err());
        reg.set_number_of_moving_feature_images(1);
        reg.set_moving_primary_feature_image(image.clone()).unwrap();
        reg.set_moving_primary_feature_interpolator(Arc::new(LinearInterpolator::new(image.clone())))
            .unwrap();
        assert!(Arc::ptr_eq(reg.moving_feature_image(0).unwrap(), &image));
        assert!(reg.moving_feature_interpolator(0).is_some());
        assert!(reg.fixed_feature_interpolator(0).is_none());
    }

    #[test]
    fn test_resize_preserves_and_discards() {
        let mut reg = make_registry(3, 0);
        let image = test_images::linear_2d();
        reg.set_fixed_feature_image(0, image.clone()).unwrap();
        reg.set_fixed_feature_image(2, image.clone()).unwrap();
        reg.set_number_of_fixed_feature_images(5);
        assert!(reg.fixed_feature_image(0).is_some());
        assert!(reg.fixed_feature_image(2).is_some());
        assert!(reg.fixed_feature_image(4).is_none());

        reg.set_number_of_fixed_feature_images(1);
        reg.set_number_of_fixed_feature_images(3);
        assert!(reg.fixed_feature_image(0).is_some());
        assert!(reg.fixed_feature_image(2).is_none());
    }

    #[test]
    fn test_initialize_binds_defaults() {
        let mut reg = make_registry(1, 2);
        let image = test_images::smooth_2d();
        reg.set_fixed_feature_image(0, image.clone()).unwrap();
        reg.set_moving_feature_image(0, image.clone()).unwrap();
        reg.initialize().unwrap();

        assert!(reg.is_initialized());
        let interp = reg.fixed_feature_interpolator(0).unwrap();
        assert!(Arc::ptr_eq(interp.image(), &image));
        assert!(reg.moving_feature_interpolator(1).is_none());
        assert_eq!(reg.moving_derivative_flags(), Some(vec![false, false]));
    }

    #[test]
    fn test_initialize_bspline_defaults() {
        let mut reg = make_registry(1, 2);
        reg.set_default_interpolator(InterpolatorKind::BSpline, 2);
        let image = test_images::smooth_2d();
        reg.set_fixed_feature_image(0, image.clone()).unwrap();
        reg.set_moving_feature_image(0, image.clone()).unwrap();
        reg.set_moving_feature_image(1, test_images::linear_2d()).unwrap();
        reg.set_moving_feature_interpolator(
            1,
            Arc::new(NearestNeighbourInterpolator::new(
                reg.moving_feature_image(1).unwrap().clone(),
            )),
        )
        .unwrap();
        reg.initialize().unwrap();

        assert_eq!(reg.moving_derivative_flags(), Some(vec![true, false]));
        assert!(reg.moving_derivative(0).is_some());
        assert!(reg.moving_derivative(1).is_none());
    }

    #[test]
    fn test_initialize_failures_keep_state() {
        let mut reg = make_registry(0, 1);
        let image = test_images::smooth_2d();
        reg.set_moving_feature_image(0, image).unwrap();
        reg.set_moving_feature_interpolator(
            0,
            Arc::new(LinearInterpolator::new(test_images::smooth_2d())),
        )
        .unwrap();
        assert!(matches!(
            reg.initialize(),
            Err(Error::InterpolatorImageMismatch { channel: 0 })
        ));
        assert!(!reg.is_initialized());
        assert!(reg.moving_derivative_flags().is_none());

        let mut reg = make_registry(1, 0);
        reg.set_default_interpolator(InterpolatorKind::BSpline, 4);
        reg.set_fixed_feature_image(0, test_images::smooth_2d()).unwrap();
        assert!(matches!(reg.initialize(), Err(Error::UnsupportedSplineOrder(4))));
        assert!(reg.fixed_feature_interpolator(0).is_none());
    }

    #[test]
    fn test_initialize_dispatch_failure() {
        let mut data = ArrayD::zeros(IxDyn(&[5, 5]));
        data[&[2, 2][..]] = f64::INFINITY;
        let bad = Arc::new(FeatureImage::from_array(data).unwrap());

        let mut reg = make_registry(1, 1);
        reg.set_default_interpolator(InterpolatorKind::BSpline, 3);
        reg.set_fixed_feature_image(0, test_images::smooth_2d()).unwrap();
        reg.set_moving_feature_image(0, bad).unwrap();
        let err = reg.initialize().unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
        assert!(!reg.is_initialized());
        assert!(reg.fixed_feature_interpolator(0).is_none());
        assert!(reg.moving_feature_interpolator(0).is_none());
    }

    #[test]
    fn test_initialize_failure_joins_every_decomposition() {
        let mut data = ArrayD::zeros(IxDyn(&[5, 5]));
        data[&[1, 3][..]] = f64::NAN;
        let bad = Arc::new(FeatureImage::from_array(data).unwrap());
        let large = Arc::new(
            FeatureImage::from_array(ArrayD::from_shape_fn(IxDyn(&[300, 300]), |idx| {
                (idx[0] as f64 * 0.1).sin() + (idx[1] as f64 * 0.2).cos()
            }))
            .unwrap(),
        );

        let mut reg = make_registry(1, 2);
        reg.set_default_interpolator(InterpolatorKind::BSpline, 3);
        reg.set_fixed_feature_image(0, bad).unwrap();
        reg.set_moving_feature_image(0, large.clone()).unwrap();
        reg.set_moving_feature_image(1, large.clone()).unwrap();
        assert!(matches!(reg.initialize(), Err(Error::Dispatch(_))));

        // held by this test and by the two moving channels only
        assert_eq!(Arc::strong_count(&large), 3);
        assert!(reg.moving_feature_interpolator(0).is_none());
        assert!(reg.moving_feature_interpolator(1).is_none());
    }

    #[test]
    fn test_mutation_clears_initialized() {
        let mut reg = make_registry(1, 1);
        reg.initialize().unwrap();
        assert!(reg.is_initialized());
        reg.set_feature_image(Side::Moving, 0, test_images::linear_2d())
            .unwrap();
        assert!(!reg.is_initialized());
        reg.initialize().unwrap();
        assert!(reg.moving_feature_interpolator(0).is_some());
    }
}
