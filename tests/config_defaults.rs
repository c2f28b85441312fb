use std::path::PathBuf;

use gpuimage_blur::config::SelectiveConfig;
use gpuimage_blur::render::BlurFilter;
use gpuimage_blur::{BlurConfig, BlurVariant, headless, load_config_from_path};
use image::{DynamicImage, Rgba, RgbaImage};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gpuimage-blur-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn config_file_round_trips_through_disk() {
    let dir = scratch_dir("config");
    let path = dir.join("blur.json");
    std::fs::write(
        &path,
        r#"{
            "variant": "fixed21",
            "blurSize": 4.0,
            "selective": { "center": [0.25, 0.5], "transitionWidth": 0.05 }
        }"#,
    )
    .unwrap();

    let config = load_config_from_path(&path).unwrap();
    assert_eq!(config.variant, BlurVariant::Fixed21);
    assert_eq!(config.effective_blur_size(), 4.0);
    assert_eq!(config.texel_spacing, 1.0);
    let selective = config.selective.unwrap();
    assert_eq!(selective.center, [0.25, 0.5]);
    assert_eq!(selective.radius, SelectiveConfig::default().radius);
    assert_eq!(selective.transition_width, 0.05);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_or_malformed_config_reports_the_path() {
    let dir = scratch_dir("bad-config");
    let missing = dir.join("absent.json");
    let err = load_config_from_path(&missing).unwrap_err();
    assert!(format!("{err:#}").contains("absent.json"));

    let bad = dir.join("bad.json");
    std::fs::write(&bad, r#"{ "variant": "box" }"#).unwrap();
    let err = load_config_from_path(&bad).unwrap_err();
    assert!(format!("{err:#}").contains("bad.json"));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn variant_defaults_follow_the_blur_size_meaning() {
    let dynamic = BlurConfig::default();
    assert_eq!(dynamic.effective_blur_size(), 9.8);

    let fixed9 = BlurConfig {
        variant: BlurVariant::Fixed9,
        ..BlurConfig::default()
    };
    assert_eq!(fixed9.effective_blur_size(), 8.0);
    assert_eq!(fixed9.build_pipeline().horizontal_texel_offset_ratio(), 8.0);
}

#[test]
fn selective_section_builds_a_selective_filter() {
    let plain = BlurConfig::default().build_filter(None);
    assert!(matches!(plain, BlurFilter::Plain(_)));

    let config = BlurConfig {
        selective: Some(SelectiveConfig::default()),
        ..BlurConfig::default()
    };
    assert!(matches!(config.build_filter(None), BlurFilter::Selective(_)));
}

#[test]
fn headless_png_keeps_size_and_flat_colour() {
    let dir = scratch_dir("headless");
    let input = dir.join("flat.png");
    let output = dir.join("nested").join("flat-blurred.png");
    RgbaImage::from_pixel(12, 9, Rgba([40, 120, 200, 255])).save(&input).unwrap();

    for variant in BlurVariant::ALL {
        let config = BlurConfig {
            variant,
            ..BlurConfig::default()
        };
        headless::blur_file_to_png(&input, &output, &config).unwrap();
        let blurred = image::open(&output).unwrap().to_rgba8();
        assert_eq!(blurred.dimensions(), (12, 9), "{variant}");
        for pixel in blurred.pixels() {
            for (got, want) in pixel.0.iter().zip([40u8, 120, 200, 255]) {
                assert!(got.abs_diff(want) <= 1, "{variant}: {:?}", pixel.0);
            }
        }
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn headless_selective_blur_leaves_the_centre_sharp() {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_fn(24, 24, |x, y| {
        let v = if (x + y) % 2 == 0 { 255 } else { 0 };
        Rgba([v, v, v, 255])
    }));
    let config = BlurConfig {
        blur_size: Some(2.0),
        selective: Some(SelectiveConfig {
            radius: 0.3,
            transition_width: 0.1,
            ..SelectiveConfig::default()
        }),
        ..BlurConfig::default()
    };
    let out = headless::blur_image(&image, &config).unwrap();
    let source = image.to_rgba8();
    assert_eq!(out.get_pixel(12, 12), source.get_pixel(12, 12));
    assert_ne!(out.get_pixel(0, 0), source.get_pixel(0, 0));
}
