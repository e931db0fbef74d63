//! List segmentation methods

use e2x_core::{SegmentationMethod, SegmentationParams};

pub fn list_methods() {
    let params = SegmentationParams::default();
    println!("Segmentation methods:");
    for method in SegmentationMethod::ALL {
        let details = match method {
            SegmentationMethod::Slic => format!(
                "compactness {}, {} iterations",
                params.slic_compactness, params.slic_max_iter
            ),
            SegmentationMethod::Quickshift => format!(
                "kernel {}, max_dist {}, ratio {}",
                params.quickshift_kernel_size, params.quickshift_max_dist, params.quickshift_ratio
            ),
            SegmentationMethod::Felzenszwalb => format!(
                "scale {}, sigma {}, min_size {}",
                params.felzenszwalb_scale, params.felzenszwalb_sigma, params.felzenszwalb_min_size
            ),
            SegmentationMethod::Uniform => "fixed grid".to_string(),
        };
        let determinism = if method.is_deterministic() {
            "deterministic"
        } else {
            "content-aware"
        };
        println!("  {:<14} {:<14} {}", method.name(), determinism, details);
    }
}
