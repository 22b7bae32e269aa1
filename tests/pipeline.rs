use assert_fs::{prelude::*, TempDir};
use ellipso_maps::{Experiment, FitDriver, ImageStack, Maps, Metadata, PixelFit};
use image::{ImageBuffer, LumaA};

const WIDTH: u32 = 4;
const HEIGHT: u32 = 3;
const ROWS: usize = 3;
const LAMBDA: [f64; ROWS] = [400., 500., 600.];

/// Psi grey level gain, 65535 levels over [0, 90] degrees
const PSI_GAIN: f64 = 90. / 65535.;
/// Delta grey level gain, 65535 levels over [0, 360] degrees
const DELTA_GAIN: f64 = 360. / 65535.;

/// Psi [deg]
fn psi(t: f64, lambda: f64) -> f64 {
    20. + 0.05 * t + (lambda - 400.) / 100.
}
/// Delta [deg]
fn delta(t: f64, lambda: f64) -> f64 {
    150. - 0.2 * t - (lambda - 400.) / 50.
}
/// Oxide thickness of pixel `(x, y)` at timepoint `i`
fn truth(i: usize, x: u32, y: u32) -> f64 {
    100. + 50. * i as f64 + 10. * x as f64 + 20. * y as f64
}

fn write_image(path: &std::path::Path, f: impl Fn(u32, u32) -> Option<f64>) {
    ImageBuffer::from_fn(WIDTH, HEIGHT, |x, y| match f(x, y) {
        Some(v) => LumaA([v.round() as u16, u16::MAX]),
        None => LumaA([0u16, 0]),
    })
    .save(path)
    .unwrap();
}

/// Writes the raw experiment: one measurement file for 2 timepoints and the
/// numbered camera images, `2 * ROWS` per timepoint
fn experiment(temp: &TempDir) {
    let files = 2 * ROWS;
    let mut dat = String::from(
        "#Lambda\tAOI\tBandwidth\tExposureTime\tZone\tTime\tDelta\tPsi\n[nm]\t[deg]\t[nm]\t[ms]\t\t[s]\t[deg]\t[deg]\n",
    );
    for i in 0..2 {
        for (r, &lambda) in LAMBDA.iter().enumerate() {
            let index = i * files + 2 * r + 1;
            dat.push_str(&format!(
                "{lambda}\t50\t10\t25\t1\t{r}\tcu_{:03}.png\tcu_{:03}.png\n",
                index,
                index + 1
            ));
            // the first pixel is masked at the second timepoint
            let masked = |x: u32, y: u32| i == 1 && (x, y) == (0, 0);
            write_image(&temp.path().join(format!("cu_{:03}.png", index)), |x, y| {
                (!masked(x, y)).then(|| delta(truth(i, x, y), lambda) / DELTA_GAIN)
            });
            write_image(&temp.path().join(format!("cu_{:03}.png", index + 1)), |x, y| {
                (!masked(x, y)).then(|| psi(truth(i, x, y), lambda) / PSI_GAIN)
            });
        }
    }
    temp.child("cu.ds.dat").write_str(&dat).unwrap();
    temp.child("cu.ds.png").write_binary(b"png").unwrap();

    let model: String = (0..=50)
        .flat_map(|k| {
            let t = 10. * k as f64;
            LAMBDA
                .iter()
                .map(move |&l| format!("{t},{l},50,{},{}\n", psi(t, l), delta(t, l)))
        })
        .collect();
    temp.child("model.csv")
        .write_str(&format!("thickness,lambda,aoi,psi,delta\n{model}"))
        .unwrap();

    temp.child("experiment.toml")
        .write_str(&format!(
            r#"
maps = {:?}
template = "measurement_{{time}}min_120C"

[timepoints]
count = 2
interval = 30

[split]
dat = "cu.ds.dat"
assets = ["cu.ds.png"]
rows = {ROWS}

[collect]
prefix = "cu_"
files = {files}

[fit]
dat = "cu.ds.dat"
model = "model.csv"
threads = 2
thickness = {{ initial = 50.0, lower = 0.0, upper = 500.0 }}
psi_scale = {{ min = 0.0, max = 90.0, levels = 65535 }}
delta_scale = {{ offset = 0.0, gain = {DELTA_GAIN:e} }}
"#,
            temp.path()
        ))
        .unwrap();
}

#[test]
fn pipeline() {
    let temp = TempDir::new().unwrap();
    experiment(&temp);
    let experiment = Experiment::from_path(temp.path().join("experiment.toml")).unwrap();

    let folders = experiment.splitter().unwrap().split().unwrap();
    assert_eq!(folders.len(), 2);
    assert_eq!(experiment.collector().unwrap().collect().unwrap(), folders);
    assert!(folders[1].join("cu.ds.png").exists());

    let fit = experiment.fit.as_ref().unwrap();
    let model = fit.model(&experiment).unwrap();
    let out = fit.out(&experiment);
    let (psi_scale, delta_scale) = fit.scales();
    std::fs::create_dir_all(&out).unwrap();
    for (timepoint, folder) in experiment.folders() {
        let metadata = Metadata::from_path(folder.join("cu.ds.dat")).unwrap();
        assert_eq!(metadata.lambda(), LAMBDA.to_vec());
        // grey levels, not degrees, without the scales
        let raw = ImageStack::load(&metadata).unwrap();
        assert!(raw.pixel(1, 1).psi.iter().all(|&v| v > 90.));
        let stack = ImageStack::load_scaled(&metadata, psi_scale, delta_scale).unwrap();
        let maps = FitDriver::new().threads(2).run(&stack, &model).unwrap();
        assert_eq!((maps.height(), maps.width()), (HEIGHT as usize, WIDTH as usize));
        assert_eq!(maps.save(&out, timepoint.minutes).unwrap().len(), 5);
    }

    assert_eq!(Maps::timepoints(&out).unwrap(), vec![0, 30]);
    for (i, minutes) in [0, 30].into_iter().enumerate() {
        let maps = Maps::load(&out, minutes).unwrap();
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let (row, col) = (y as usize, x as usize);
                if i == 1 && (x, y) == (0, 0) {
                    assert!(maps.thickness[[row, col]].is_nan());
                    assert_eq!(maps.status[[row, col]], PixelFit::NO_DATA);
                } else {
                    let thickness = maps.thickness[[row, col]];
                    assert!((thickness - truth(i, x, y)).abs() < 0.5, "{thickness}");
                    assert_eq!(maps.status[[row, col]], PixelFit::CONVERGED);
                }
            }
        }
    }
}
