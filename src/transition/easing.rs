use lyon_algorithms::measure::{PathMeasurements, SampleType};
use lyon_algorithms::path::{builder::NoAttributes, path::BuilderImpl, Path};
use once_cell::sync::Lazy;

/// Fast start, long settle. Used for layout transitions and camera flights.
pub static EMPHASIZED: Lazy<Easing> = Lazy::new(|| {
    Easing::builder()
        .cubic_bezier_to([0.05, 0.0], [0.133333, 0.06], [0.166666, 0.4])
        .cubic_bezier_to([0.208333, 0.82], [0.25, 1.0], [1.0, 1.0])
        .build()
});

pub static LINEAR: Lazy<Easing> = Lazy::new(|| Easing::builder().build());

/// Maps normalized time to normalized progress.
pub trait Curve: Send + Sync + std::fmt::Debug {
    fn y_at_x(&self, x: f32) -> f32;
}

pub struct Easing {
    path: Path,
    measurements: PathMeasurements,
}

impl std::fmt::Debug for Easing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Easing").finish_non_exhaustive()
    }
}

impl Easing {
    pub fn builder() -> Builder {
        Builder::new()
    }
}

impl Curve for Easing {
    fn y_at_x(&self, x: f32) -> f32 {
        let mut sampler = self.measurements.create_sampler(&self.path, SampleType::Normalized);
        let sample = sampler.sample(x.clamp(0.0, 1.0));
        sample.position().y
    }
}

pub struct Builder(NoAttributes<BuilderImpl>);

impl Builder {
    pub fn new() -> Self {
        let mut builder = Path::builder();
        builder.begin(lyon_algorithms::geom::point(0.0, 0.0));

        Self(builder)
    }

    /// Adds a cubic bézier curve. Points must be between 0,0 and 1,1
    pub fn cubic_bezier_to(mut self, ctrl1: [f32; 2], ctrl2: [f32; 2], to: [f32; 2]) -> Self {
        self.0
            .cubic_bezier_to(Self::point(ctrl1), Self::point(ctrl2), Self::point(to));

        self
    }

    pub fn build(mut self) -> Easing {
        self.0.line_to(lyon_algorithms::geom::point(1.0, 1.0));
        self.0.end(false);

        let path = self.0.build();
        let measurements = PathMeasurements::from_path(&path, 0.0);

        Easing { path, measurements }
    }

    fn point([x, y]: [f32; 2]) -> lyon_algorithms::geom::Point<f32> {
        lyon_algorithms::geom::point(x.clamp(0.0, 1.0), y.clamp(0.0, 1.0))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curves_start_at_zero_and_end_at_one() {
        for curve in [&*EMPHASIZED, &*LINEAR] {
            assert!(curve.y_at_x(0.0).abs() < 1e-3);
            assert!((curve.y_at_x(1.0) - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn linear_is_linear() {
        assert!((LINEAR.y_at_x(0.25) - 0.25).abs() < 1e-3);
    }

    #[test]
    fn emphasized_front_loads_progress() {
        let mut last = 0.0;
        for step in 0..=20 {
            let y = EMPHASIZED.y_at_x(step as f32 / 20.0);
            assert!(y + 1e-4 >= last);
            last = y;
        }
        assert!(EMPHASIZED.y_at_x(0.5) > 0.5);
    }
}
