use cloudsmooth_core::{
    Config, Header, IndexSet, LocalBus, MovingLeastSquares, Point, PointCloud, Publisher, Stage,
    Transport,
};
use std::{sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let config = Config::from_yaml(
        r#"
search_radius: 0.15
spatial_locator: rtree
use_indices: true
approximate_sync: true
approximate_tolerance: 10ms
"#,
    )?;

    let bus = LocalBus::new();
    let smoothed = bus.subscription::<PointCloud>("output")?;
    let stage = Stage::start(&bus, &config, MovingLeastSquares::new());

    let clouds = bus.advertise::<PointCloud>("input")?;
    let indices = bus.advertise::<IndexSet>("indices")?;

    // Three frames of a wavy 10x10 sheet, each with an index set stamped a
    // few milliseconds later.
    for frame in 0..3u64 {
        let stamp = Duration::from_millis(1000 + frame * 100);
        let points = (0..100)
            .map(|i| {
                let (x, y) = ((i % 10) as f32 * 0.1, (i / 10) as f32 * 0.1);
                Point::new(x, y, 1.0 + 0.02 * (x * 20.0).sin())
            })
            .collect();
        clouds.publish(Arc::new(PointCloud::new(Header::new("lidar", stamp), points)))?;

        let roi = (0..50).collect();
        let stamp = stamp + Duration::from_millis(3);
        indices.publish(Arc::new(IndexSet::new(Header::new("lidar", stamp), roi)))?;
    }
    bus.close("input");
    bus.close("indices");

    let stats = stage.run().await;
    println!("{stats:#?}");

    for cloud in smoothed.drain() {
        println!(
            "{} points at {:?} in frame {}",
            cloud.len(),
            cloud.header.stamp,
            cloud.header.frame_id
        );
    }

    Ok(())
}
