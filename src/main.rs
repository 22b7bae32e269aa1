use anyhow::Context;
use ellipso_maps::{
    Collector, Experiment, FitDriver, FolderTemplate, ImageScale, ImageSeries, ImageStack, Metadata,
    ModelTable, Parameter, PixelFitter, Splitter, Timepoints,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ellipso-maps",
    about = "Copper oxidation imaging ellipsometry maps"
)]
enum Opt {
    /// Splits a multi-timepoint measurement file into timepoint folders
    Split {
        /// Path to the measurement file
        #[structopt(long, parse(from_os_str))]
        dat: PathBuf,
        /// Files copied into every timepoint folder
        #[structopt(long, parse(from_os_str))]
        asset: Vec<PathBuf>,
        #[structopt(flatten)]
        timepoints: TimepointsOpt,
        /// Number of body lines per timepoint
        #[structopt(long, default_value = "20")]
        rows: usize,
        /// Number of header lines
        #[structopt(long, default_value = "2")]
        header_lines: usize,
    },
    /// Copies numbered images into timepoint folders
    Collect {
        /// Folder of the numbered images
        #[structopt(long, parse(from_os_str))]
        base: PathBuf,
        /// Image file name prefix
        #[structopt(long)]
        prefix: String,
        #[structopt(flatten)]
        timepoints: TimepointsOpt,
        /// Number of images per timepoint
        #[structopt(long, default_value = "40")]
        files: usize,
        /// Image number zero padding width
        #[structopt(long, default_value = "3")]
        width: usize,
        #[structopt(long, default_value = "png")]
        extension: String,
    },
    /// Fits the oxide thickness of every pixel of a measurement
    Fit {
        /// Path to the measurement file or to its folder
        #[structopt(long, parse(from_os_str))]
        dat: PathBuf,
        /// Path to the model table
        #[structopt(long, parse(from_os_str))]
        model: PathBuf,
        /// Measurement timepoint [minutes]
        #[structopt(long, default_value = "0")]
        minutes: u32,
        /// Output folder
        #[structopt(long, parse(from_os_str), default_value = "fits")]
        out: PathBuf,
        /// Number of threads, defaults to the number of CPU cores
        #[structopt(long)]
        threads: Option<usize>,
        /// Thickness lower bound
        #[structopt(long, default_value = "0")]
        lower: f64,
        /// Thickness upper bound
        #[structopt(long, default_value = "1000")]
        upper: f64,
        /// Psi image grey level offset [deg]
        #[structopt(long, default_value = "0")]
        psi_offset: f64,
        /// Psi image grey level gain [deg/level]
        #[structopt(long, default_value = "1")]
        psi_gain: f64,
        /// Delta image grey level offset [deg]
        #[structopt(long, default_value = "0")]
        delta_offset: f64,
        /// Delta image grey level gain [deg/level]
        #[structopt(long, default_value = "1")]
        delta_gain: f64,
        /// Renders the thickness heatmaps
        #[structopt(short, long)]
        plot: bool,
    },
    /// Renders PNG images or saved maps as heatmaps
    Plot {
        /// Path to a PNG image
        #[structopt(long, parse(from_os_str))]
        png: Option<PathBuf>,
        /// Image timepoint
        #[structopt(long, default_value = "0")]
        time: u32,
        /// Heatmap file
        #[structopt(long, parse(from_os_str))]
        out: Option<PathBuf>,
        /// Folder of the saved maps
        #[structopt(long, parse(from_os_str))]
        maps: Option<PathBuf>,
        /// Maps timepoint, all the saved timepoints if omitted
        #[structopt(long)]
        minutes: Option<u32>,
    },
    /// Runs the stages of an experiment configuration file
    Run {
        #[structopt(long, parse(from_os_str))]
        config: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
struct TimepointsOpt {
    /// Number of timepoints
    #[structopt(long, default_value = "13")]
    count: usize,
    /// Time between timepoints [minutes]
    #[structopt(long, default_value = "30")]
    interval: u32,
    /// Timepoint folder template, e.g. "measurement_{time}min_120C"
    #[structopt(long)]
    template: String,
    /// Timepoint folders root
    #[structopt(long, parse(from_os_str))]
    dest: Option<PathBuf>,
}
impl TimepointsOpt {
    fn timepoints(&self) -> anyhow::Result<Timepoints> {
        let timepoints = Timepoints::new(self.count, self.interval);
        timepoints.validate()?;
        Ok(timepoints)
    }
    fn template(&self) -> anyhow::Result<FolderTemplate> {
        Ok(FolderTemplate::new(self.template.as_str())?)
    }
}

fn fit<F: PixelFitter>(
    dat: &Path,
    fitter: &F,
    driver: &FitDriver,
    (psi_scale, delta_scale): (ImageScale, ImageScale),
    out: &Path,
    minutes: u32,
    plot: bool,
) -> anyhow::Result<()> {
    let dat = if dat.is_dir() {
        Metadata::find(dat)?
    } else {
        dat.to_path_buf()
    };
    let metadata = Metadata::from_path(&dat)?;
    let stack = ImageStack::load_scaled(&metadata, psi_scale, delta_scale)?;
    let maps = driver.run(&stack, fitter)?;
    maps.summary();
    fs::create_dir_all(out).with_context(|| format!("failed to create {:?}", out))?;
    maps.save(out, minutes)?;
    if plot {
        render(&maps.maps(), out, minutes)?;
    }
    Ok(())
}

#[cfg(feature = "plot")]
fn render(maps: &ellipso_maps::Maps, out: &Path, minutes: u32) -> anyhow::Result<()> {
    maps.render(out, minutes)?;
    Ok(())
}
#[cfg(not(feature = "plot"))]
fn render(_: &ellipso_maps::Maps, _: &Path, _: u32) -> anyhow::Result<()> {
    anyhow::bail!("ellipso-maps was built without the `plot` feature")
}

fn check_plot_args(png: &Option<PathBuf>, maps: &Option<PathBuf>) -> anyhow::Result<()> {
    if png.is_none() && maps.is_none() {
        anyhow::bail!("nothing to plot: use `plot --png <image>` or `plot --maps <folder>`")
    }
    Ok(())
}

#[cfg(feature = "plot")]
fn plot(
    png: Option<PathBuf>,
    time: u32,
    out: Option<PathBuf>,
    maps: Option<PathBuf>,
    minutes: Option<u32>,
) -> anyhow::Result<()> {
    if let Some(png) = png {
        let image = ellipso_maps::ImageData::load(&png, time)?;
        let out = out.unwrap_or_else(|| png.with_extension("heatmap.png"));
        image.plot("", &out)?;
        log::info!("Heatmap saved to {:?}", out);
    }
    if let Some(dir) = maps {
        let minutes = match minutes {
            Some(minutes) => vec![minutes],
            None => ellipso_maps::Maps::timepoints(&dir)?,
        };
        for m in minutes {
            ellipso_maps::Maps::load(&dir, m)?.render(&dir, m)?;
        }
    }
    Ok(())
}
#[cfg(not(feature = "plot"))]
fn plot(
    _: Option<PathBuf>,
    _: u32,
    _: Option<PathBuf>,
    _: Option<PathBuf>,
    _: Option<u32>,
) -> anyhow::Result<()> {
    anyhow::bail!("ellipso-maps was built without the `plot` feature")
}

fn run(config: &Path) -> anyhow::Result<()> {
    let experiment = Experiment::from_path(config)?;
    if let Some(splitter) = experiment.splitter() {
        splitter.split()?;
    }
    if let Some(collector) = experiment.collector() {
        collector.collect()?;
    }
    if let Some(section) = &experiment.fit {
        let model = section.model(&experiment)?;
        let driver = section.driver();
        let scales = section.scales();
        let out = section.out(&experiment);
        for (timepoint, folder) in experiment.folders() {
            log::info!("Timepoint {}: {:?}", timepoint, folder);
            let dat = match &section.dat {
                Some(name) => folder.join(name),
                None => folder,
            };
            fit(&dat, &model, &driver, scales, &out, timepoint.minutes, section.plot)
                .with_context(|| format!("failed to fit timepoint {}", timepoint))?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    match opt {
        Opt::Split {
            dat,
            asset,
            timepoints,
            rows,
            header_lines,
        } => {
            let mut splitter = Splitter::new(&dat, timepoints.template()?)
                .assets(asset)
                .timepoints(timepoints.timepoints()?)
                .rows(rows)
                .header_lines(header_lines);
            if let Some(dest) = timepoints.dest {
                splitter = splitter.destination(dest);
            }
            let folders = splitter.split()?;
            println!("{} timepoint folders written", folders.len());
        }
        Opt::Collect {
            base,
            prefix,
            timepoints,
            files,
            width,
            extension,
        } => {
            let series = ImageSeries::new(prefix).width(width).extension(extension);
            let mut collector = Collector::new(&base, series, timepoints.template()?)
                .timepoints(timepoints.timepoints()?)
                .files(files);
            if let Some(dest) = timepoints.dest {
                collector = collector.destination(dest);
            }
            let folders = collector.collect()?;
            println!("{} timepoint folders written", folders.len());
        }
        Opt::Fit {
            dat,
            model,
            minutes,
            out,
            threads,
            lower,
            upper,
            psi_offset,
            psi_gain,
            delta_offset,
            delta_gain,
            plot,
        } => {
            let initial = Parameter::thickness().value.max(lower).min(upper);
            let parameter = Parameter::new(initial, lower, upper);
            let model = ModelTable::from_path(&model)?.parameter(parameter)?;
            let mut driver = FitDriver::new().progress(true);
            if let Some(threads) = threads {
                driver = driver.threads(threads);
            }
            let scales = (
                ImageScale::new(psi_offset, psi_gain),
                ImageScale::new(delta_offset, delta_gain),
            );
            fit(&dat, &model, &driver, scales, &out, minutes, plot)?;
        }
        Opt::Plot {
            png,
            time,
            out,
            maps,
            minutes,
        } => {
            check_plot_args(&png, &maps)?;
            plot(png, time, out, maps, minutes)?
        }
        Opt::Run { config } => run(&config)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plot_needs_an_input() {
        let err = check_plot_args(&None, &None).unwrap_err();
        assert!(err.to_string().contains("--png"));
        assert!(check_plot_args(&Some(PathBuf::from("cu_001.png")), &None).is_ok());
        assert!(check_plot_args(&None, &Some(PathBuf::from("fits"))).is_ok());
    }
}
