mod common;

use std::{collections::HashSet, time::Duration};

use common::*;
use rcnn_dataset::{
    common::*, config::ProposalNoise, BBox3D::XYZLWHRotY, Config, ObjectType, PipelineState,
    TrainingStream,
};

fn prepare_stream(
    provider: MockProvider,
    frame_ids: &[&str],
    config: Config,
) -> Result<TrainingStream<MockProvider>> {
    init_logging();
    let frame_ids = frame_ids.iter().map(|id| id.to_string()).collect();
    TrainingStream::new(Arc::new(config), provider, frame_ids, StdRng::seed_from_u64(7))
}

#[test]
fn two_labels_make_one_epoch() -> Result<()> {
    let provider = MockProvider::new().with_frame("000001", vec![car(), pedestrian()]);
    let mut stream = prepare_stream(provider, &["000001"], prepare_config(64, 16))?;
    assert_eq!(stream.state(), PipelineState::Idle);
    stream.start(false)?;
    assert_eq!(stream.state(), PipelineState::Running);

    let (batch, is_last_batch) = stream.get_next_batch(2)?;
    assert!(is_last_batch);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.ids, vec!["000001", "000001"]);
    assert_eq!(batch.pointcloud.dim(), (2, 64, 6));
    assert_eq!(batch.images.dim(), (2, 20, 40, 3));

    let classes: HashSet<i32> = batch.label.iter().copied().collect();
    assert_eq!(classes, [1, 2].into_iter().collect());

    // 提议框与真值框重合，所有点都在真值框内
    assert!(batch.pointcloud.slice(s![.., .., 4]).iter().all(|&v| v == 0.0));
    assert!(batch.pointcloud.slice(s![.., .., 5]).iter().all(|&v| v == 1.0));

    let car_index = batch.label.iter().position(|&label| label == 1).unwrap();
    assert_eq!(
        batch.prop_box.row(car_index).to_vec(),
        vec![2.0, 1.5, 12.0, 0.0, 4.0, 1.5, 1.6]
    );
    assert_eq!(batch.center_x_cls[car_index], 6);
    assert_eq!(batch.center_z_cls[car_index], 6);
    assert!((batch.center_x_res[car_index] + 0.125).abs() < 1e-5);
    assert_eq!(batch.size_cls[car_index], 0);
    assert!((batch.calib[[car_index, 0, 0]] - 4.0).abs() < 1e-5);
    assert!((batch.calib[[car_index, 1, 1]] - 4.0).abs() < 1e-5);
    assert!(batch
        .gt_box_of_prop
        .slice(s![car_index, .., ..])
        .iter()
        .any(|&v| v != 0.0));

    stream.stop()?;
    assert_eq!(stream.state(), PipelineState::Stopped);
    Ok(())
}

#[test]
fn resampled_points_come_from_the_sample() -> Result<()> {
    let provider = MockProvider::new().with_frame("000001", vec![car(), pedestrian()]);
    let mut stream = prepare_stream(provider, &["000001"], prepare_config(64, 16))?;
    stream.start(false)?;

    for _ in 0..3 {
        let (batch, _) = stream.get_next_batch(2)?;
        for index in 0..batch.len() {
            let rows: HashSet<Vec<OrderedFloat<f32>>> = batch
                .pointcloud
                .slice(s![index, .., ..])
                .outer_iter()
                .map(|row| row.iter().copied().map(OrderedFloat).collect())
                .collect();

            match batch.label[index] {
                // 125 个点中不放回地取 64 个
                1 => assert_eq!(rows.len(), 64),
                // 27 个点有放回地补足 64 个
                2 => assert!(rows.len() <= 27),
                label => panic!("unexpected label {}", label),
            }
        }
    }

    stream.stop()?;
    Ok(())
}

#[test]
fn sample_ids_strictly_increase() -> Result<()> {
    let provider = MockProvider::new()
        .with_frame("000001", vec![car(), pedestrian()])
        .with_frame("000002", vec![pedestrian()]);
    let mut stream = prepare_stream(provider, &["000001", "000002"], prepare_config(32, 8))?;
    stream.start(false)?;

    let mut ids = vec![];
    for _ in 0..10 {
        let (batch, _) = stream.get_next_batch(1)?;
        ids.extend(batch.sample_ids);
    }
    assert_eq!(ids, (0..10).collect::<Vec<u64>>());

    stream.stop()?;
    Ok(())
}

#[test]
fn last_sample_of_every_epoch_is_marked() -> Result<()> {
    let provider = MockProvider::new()
        .with_frame("000001", vec![car(), pedestrian()])
        .with_frame("000002", vec![])
        .with_frame("000003", vec![car()]);
    let mut stream = prepare_stream(
        provider,
        &["000001", "000002", "000003"],
        prepare_config(32, 4),
    )?;
    stream.start(false)?;

    // 每个 epoch 恰好有 3 个样本，与帧顺序无关
    let flags: Vec<bool> = (0..9)
        .map(|_| stream.get_next_batch(1).map(|(_, is_last)| is_last))
        .collect::<Result<_>>()?;
    assert_eq!(
        flags,
        vec![false, false, true, false, false, true, false, false, true]
    );

    let (_, is_last_batch) = stream.get_next_batch(3)?;
    assert!(is_last_batch);

    stream.stop()?;
    Ok(())
}

#[test]
fn augmented_scenes_still_produce_samples() -> Result<()> {
    let provider = MockProvider::new().with_frame("000001", vec![car(), pedestrian()]);
    let mut stream = prepare_stream(provider, &["000001"], prepare_config(32, 8))?;
    stream.start(true)?;

    for _ in 0..4 {
        let (batch, is_last_batch) = stream.get_next_batch(2)?;
        assert!(is_last_batch);
        let classes: HashSet<i32> = batch.label.iter().copied().collect();
        assert_eq!(classes, [1, 2].into_iter().collect());
        assert!(batch.pointcloud.slice(s![.., .., 5]).iter().all(|&v| v == 1.0));
    }

    stream.stop()?;
    Ok(())
}

#[test]
fn stop_with_full_buffer() -> Result<()> {
    let provider = MockProvider::new().with_frame("000001", vec![car(), pedestrian()]);
    let mut stream = prepare_stream(provider, &["000001"], prepare_config(16, 4))?;
    stream.start(false)?;

    let mut waited = Duration::ZERO;
    while stream.buffered() < 4 {
        ensure!(waited < Duration::from_secs(10), "buffer is never filled");
        std::thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }

    stream.request_stop();
    assert_eq!(stream.state(), PipelineState::Stopping);
    let num_drained = stream.stop()?;
    assert!(num_drained >= 4);
    assert_eq!(stream.state(), PipelineState::Stopped);
    assert_eq!(stream.buffered(), 0);
    assert!(stream.get_next_batch(1).is_err());
    assert_eq!(stream.stop()?, 0);
    Ok(())
}

#[test]
fn drop_running_stream() -> Result<()> {
    let provider = MockProvider::new().with_frame("000001", vec![car(), pedestrian()]);
    let mut stream = prepare_stream(provider, &["000001"], prepare_config(16, 2))?;
    stream.start(false)?;
    stream.get_next_batch(1)?;
    drop(stream);
    Ok(())
}

#[test]
fn missing_frame_stops_the_producer() -> Result<()> {
    let provider = MockProvider::new().with_frame("000001", vec![car()]);
    let mut stream = prepare_stream(provider, &["000001", "000404"], prepare_config(16, 8))?;
    stream.start(false)?;

    // 生产者出错后队列关闭，消费者最终得到错误
    let mut result = Ok(());
    for _ in 0..4 {
        if let Err(err) = stream.get_next_batch(1) {
            result = Err(err);
            break;
        }
    }
    assert!(result.is_err());

    let err = stream.stop().unwrap_err();
    assert!(format!("{:#}", err).contains("000404"));
    assert_eq!(stream.state(), PipelineState::Stopped);
    Ok(())
}

#[test]
fn misuse_is_rejected() -> Result<()> {
    let provider = MockProvider::new().with_frame("000001", vec![car()]);
    assert!(prepare_stream(provider.clone(), &[], prepare_config(16, 8)).is_err());

    let mut stream = prepare_stream(provider, &["000001"], prepare_config(16, 8))?;
    assert!(stream.get_next_batch(1).is_err());

    stream.start(false)?;
    assert!(stream.start(false).is_err());
    assert!(stream.get_next_batch(0).is_err());
    assert!(stream.get_next_batch(1).is_ok());

    stream.stop()?;
    assert!(stream.start(false).is_err());
    Ok(())
}

#[test]
fn open_from_split_file() -> Result<()> {
    let dir = std::env::temp_dir().join(format!("rcnn-dataset-open-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("train.txt"), "000001\n000002\n")?;

    let mut config = prepare_config(16, 8);
    config.dataset.dir = dir.clone();
    config.pipeline.seed = Some(3);

    let provider = MockProvider::new()
        .with_frame("000001", vec![car()])
        .with_frame("000002", vec![pedestrian()]);
    let mut stream = TrainingStream::open(Arc::new(config), provider)?;
    stream.start(false)?;
    let (batch, is_last_batch) = stream.get_next_batch(2)?;
    assert!(is_last_batch);
    let frames: HashSet<&str> = batch.ids.iter().map(String::as_str).collect();
    assert_eq!(frames, ["000001", "000002"].into_iter().collect());
    stream.stop()?;

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn empty_epochs_do_not_end_the_stream() -> Result<()> {
    // 默认噪声下行人的提议框常常低于 IOU 阈值，这样的 epoch 没有样本
    let mut config = prepare_config(16, 8);
    config.sampling.proposal_noise = ProposalNoise::default();
    let provider = MockProvider::new().with_frame("000001", vec![pedestrian()]);
    let mut stream = prepare_stream(provider, &["000001"], config)?;
    stream.start(false)?;

    for _ in 0..200 {
        let (batch, is_last_batch) = stream.get_next_batch(1)?;
        assert!(is_last_batch);
        assert_eq!(batch.label[0], 2);
    }

    stream.stop()?;
    Ok(())
}

#[test]
fn split_without_usable_labels_fails() -> Result<()> {
    let mut dont_care = car();
    dont_care.object_type = ObjectType::DontCare;
    let provider = MockProvider::new()
        .with_frame("000001", vec![])
        .with_frame("000002", vec![dont_care]);
    let mut stream = prepare_stream(provider, &["000001", "000002"], prepare_config(16, 8))?;
    stream.start(false)?;

    assert!(stream.get_next_batch(1).is_err());
    let err = stream.stop().unwrap_err();
    assert!(format!("{:#}", err).contains("none of the 2 frames"));
    Ok(())
}

#[test]
fn negative_samples_have_empty_targets() -> Result<()> {
    let mut config = prepare_config(32, 16);
    config.sampling.iou_threshold = 0.7;
    config.sampling.proposal_noise = ProposalNoise {
        center_std: 0.3,
        heading_std: 0.2,
        size_std: 0.1,
    };
    let labels = vec![
        car(),
        pedestrian(),
        object(ObjectType::Car, XYZLWHRotY(-6.0, 1.5, 18.0, 4.0, 1.6, 1.5, 0.0)),
        object(ObjectType::Car, XYZLWHRotY(7.0, 1.5, 25.0, 4.0, 1.6, 1.5, 0.0)),
        object(ObjectType::Pedestrian, XYZLWHRotY(3.0, 1.5, 30.0, 0.8, 0.6, 1.7, 0.0)),
    ];
    let provider = MockProvider::new().with_frame("000001", labels);
    let mut stream = prepare_stream(provider, &["000001"], config)?;
    stream.start(false)?;

    let (mut num_positive, mut num_negative) = (0usize, 0usize);
    let (mut seen_positive, mut seen_negative) = (false, false);

    // 一个 epoch 只有一帧，正负样本在帧内平衡
    for _ in 0..30 {
        loop {
            let (batch, is_last_batch) = stream.get_next_batch(1)?;
            if batch.label[0] == 0 {
                num_negative += 1;
                seen_negative = true;

                assert_eq!(batch.center_x_cls[0], 0);
                assert_eq!(batch.center_z_cls[0], 0);
                assert_eq!(batch.center_x_res[0], 0.0);
                assert_eq!(batch.center_y_res[0], 0.0);
                assert_eq!(batch.center_z_res[0], 0.0);
                assert_eq!(batch.angle_cls[0], 0);
                assert_eq!(batch.angle_res[0], 0.0);
                assert_eq!(batch.size_cls[0], 0);
                assert!(batch.size_res.iter().all(|&v| v == 0.0));
                assert!(batch.gt_box_of_prop.iter().all(|&v| v == 0.0));
                assert!(batch.prop_box.iter().any(|&v| v != 0.0));
                assert!(batch.pointcloud.slice(s![0, .., 4]).iter().all(|&v| v == 1.0));
                assert!(batch.pointcloud.slice(s![0, .., 5]).iter().all(|&v| v == 0.0));
            } else {
                num_positive += 1;
                seen_positive = true;
                assert!(batch.gt_box_of_prop.iter().any(|&v| v != 0.0));
            }

            if is_last_batch {
                break;
            }
        }

        assert!(num_negative <= num_positive);
        num_positive = 0;
        num_negative = 0;
    }

    assert!(seen_positive);
    assert!(seen_negative);
    stream.stop()?;
    Ok(())
}
