use linfa::ParamGuard;
use smogcast_eval::{
    CrossValidator, CvConfig, GridConfig, GridPredictor, GridTable, OzoneTable,
    ResponseTransform,
};
use smogcast_field::{LatentGaussian, Matern32Corr};

/// Cross-validate the ozone field model on a station table and, when a grid
/// table is given, predict a surface at one time slice.
///
/// Usage: ozone_cv <ozone.csv> [gridnysptime.csv]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let ozone_path = args.next().ok_or("usage: ozone_cv <ozone.csv> [grid.csv]")?;
    let grid_path = args.next();

    let config = CvConfig::default().n_time(Some(14));
    let table = OzoneTable::from_csv_path(
        &ozone_path,
        ResponseTransform::Sqrt,
        config.get_n_time(),
    )?;
    println!(
        "{} observations, {} stations, {} days",
        table.observations().len(),
        table.n_stations(),
        table.n_time()
    );

    let engine: LatentGaussian<f64, Matern32Corr> =
        LatentGaussian::params().n_start(2).max_eval(100).check()?;

    let cv = CrossValidator::new(config.clone())?;
    let report = cv.run(&table, &engine)?;
    println!("{report}");
    report.save("cv_report.json")?;

    if let Some(path) = grid_path {
        let grid = GridTable::from_csv_path(&path, config.get_n_time())?;
        let predictor = GridPredictor::new(GridConfig::default().model(config).time_slice(7))?;
        let surface = predictor.run(&table, &grid, &engine)?;
        let out = std::fs::File::create("surface_day7.csv")?;
        surface.to_csv(out)?;
        println!(
            "surface written: {} grid cells at day {}",
            surface.cells.len(),
            surface.time_slice
        );
    }
    Ok(())
}
