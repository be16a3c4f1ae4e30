use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use reflcore::data::profile::PixelProfile;

/// Parameters of a synthetic reflectometry count profile: a Gaussian
/// specular peak on a flat background, with optional multiplicative noise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileGenerator {
    pub n_pixels: usize,
    pub peak_center: f64,
    pub peak_width: f64,
    pub peak_amplitude: f64,
    pub background: f64,
    /// Upper bound of the uniform relative noise; 0 disables noise
    pub noise_level: f64,
}

impl Default for ProfileGenerator {
    fn default() -> Self {
        ProfileGenerator {
            // 304-pixel axis of the reflectometer detector
            n_pixels: 304,
            peak_center: 140.0,
            peak_width: 8.0,
            peak_amplitude: 5000.0,
            background: 20.0,
            noise_level: 0.1,
        }
    }
}

impl ProfileGenerator {
    /// Generates a profile of whole counts; deterministic for a fixed seed.
    pub fn generate(&self, seed: u64) -> PixelProfile {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise_dist = if self.noise_level > 0.0 {
            Some(Uniform::new(0.0, self.noise_level))
        } else {
            None
        };

        let counts: Vec<f64> = (0..self.n_pixels)
            .map(|i| {
                let z = (i as f64 - self.peak_center) / self.peak_width;
                let ideal = self.background + self.peak_amplitude * (-0.5 * z * z).exp();
                let noised = match &noise_dist {
                    Some(dist) => ideal * (1.0 + dist.sample(&mut rng)),
                    None => ideal,
                };
                noised.round()
            })
            .collect();

        PixelProfile::new(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflcore::algorithm::peak_select::{PeakFinder, SelectionConfig};

    #[test]
    fn test_same_seed_same_profile() {
        let generator = ProfileGenerator::default();
        let a = generator.generate(7);
        let b = generator.generate(7);
        assert_eq!(*a.counts, *b.counts);

        let c = generator.generate(8);
        assert_ne!(*a.counts, *c.counts);
    }

    #[test]
    fn test_noiseless_profile_is_ideal() {
        let generator = ProfileGenerator {
            noise_level: 0.0,
            ..Default::default()
        };
        let profile = generator.generate(0);
        assert_eq!(profile.len(), 304);
        // Background far from the peak, full amplitude on it
        assert_eq!(profile.counts[0], 20.0);
        assert_eq!(profile.counts[140], 5020.0);
    }

    #[test]
    fn test_selection_finds_generated_peak() {
        let generator = ProfileGenerator::default();
        let profile = generator.generate(42);

        let selection = PeakFinder::new(profile, SelectionConfig::default())
            .unwrap()
            .select()
            .unwrap();
        assert!(selection.peak.contains(140));
        assert!((selection.peak_pixel - 140).abs() <= 2);
    }
}
