//! # 训练数据流
//!
//! 一个生产者线程逐帧读取数据并生成样本，写入有界队列；
//! 消费者通过 [`TrainingStream::get_next_batch`] 取出定长批数据。

use crate::{
    common::*,
    config::Config,
    data::{
        input::{Frame, FrameProvider},
        kitti::{load_split_ids, KittiDataset},
        output::{Batch, Sample},
    },
    geometry::SceneTransform,
    sample::{FrameSampler, SampleIdCounter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// 队列中的元素，epoch_end 标记一个 epoch 的最后一个样本
#[derive(Debug)]
struct Message {
    sample: Sample,
    epoch_end: bool,
}

pub struct TrainingStream<P>
where
    P: FrameProvider,
{
    config: Arc<Config>,
    provider: Arc<P>,
    state: PipelineState,
    frame_ids: Vec<String>,
    /// 生产者的随机数，start 时移交给生产者线程
    producer_rng: Option<StdRng>,
    /// 点云重采样使用
    consumer_rng: Mutex<StdRng>,
    stop_flag: Arc<AtomicBool>,
    tx: Option<flume::Sender<Message>>,
    rx: flume::Receiver<Message>,
    producer: Option<JoinHandle<Result<()>>>,
}

impl<P> Debug for TrainingStream<P>
where
    P: FrameProvider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingStream")
            .field("state", &self.state)
            .field("num_frames", &self.frame_ids.len())
            .field("buffered", &self.rx.len())
            .finish()
    }
}

impl TrainingStream<KittiDataset> {
    /// 从配置的 KITTI 目录和划分文件建立数据流
    pub fn kitti(config: Arc<Config>) -> Result<Self> {
        let provider = KittiDataset::open(&config.dataset.dir)?;
        Self::open(config, provider)
    }
}

impl<P> TrainingStream<P>
where
    P: FrameProvider,
{
    /// 读取 `<dir>/<split>.txt`，随机种子取自配置，未配置时使用系统熵
    pub fn open(config: Arc<Config>, provider: P) -> Result<Self> {
        let frame_ids = load_split_ids(&config.dataset.dir, &config.dataset.split)?;
        let rng = match config.pipeline.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(config, provider, frame_ids, rng)
    }

    pub fn new(config: Arc<Config>, provider: P, frame_ids: Vec<String>, mut rng: StdRng) -> Result<Self> {
        config.validate()?;
        ensure!(!frame_ids.is_empty(), "no frame ids are given");

        let mut producer_rng = StdRng::seed_from_u64(rng.gen());
        let consumer_rng = StdRng::seed_from_u64(rng.gen());
        let mut frame_ids = frame_ids;
        frame_ids.shuffle(&mut producer_rng);

        let (tx, rx) = flume::bounded(config.pipeline.buffer_size.get());

        Ok(Self {
            config,
            provider: Arc::new(provider),
            state: PipelineState::Idle,
            frame_ids,
            producer_rng: Some(producer_rng),
            consumer_rng: Mutex::new(consumer_rng),
            stop_flag: Arc::new(AtomicBool::new(false)),
            tx: Some(tx),
            rx,
            producer: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// 队列中已生成但尚未取出的样本数
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    pub fn start(&mut self, augment: bool) -> Result<()> {
        ensure!(
            self.state == PipelineState::Idle,
            "pipeline cannot be started in {:?} state",
            self.state
        );

        let sampler = FrameSampler::new(&self.config)?;
        let (tx, rng) = match (self.tx.take(), self.producer_rng.take()) {
            (Some(tx), Some(rng)) => (tx, rng),
            _ => bail!("pipeline has already been started"),
        };

        let producer = Producer {
            config: self.config.clone(),
            provider: self.provider.clone(),
            frame_ids: self.frame_ids.clone(),
            sampler,
            rng,
            ids: SampleIdCounter::new(),
            stop_flag: self.stop_flag.clone(),
            tx,
            augment,
        };
        let handle = thread::Builder::new()
            .name("sample-producer".to_string())
            .spawn(move || producer.run())
            .with_context(|| "failed to spawn the producer thread")?;

        info!(
            "pipeline started with {} frames, augmentation {}",
            self.frame_ids.len(),
            if augment { "on" } else { "off" }
        );
        self.producer = Some(handle);
        self.state = PipelineState::Running;
        Ok(())
    }

    /// 通知生产者在处理下一帧前退出，不等待
    pub fn request_stop(&mut self) {
        if self.state == PipelineState::Running {
            self.stop_flag.store(true, Ordering::SeqCst);
            self.state = PipelineState::Stopping;
        }
    }

    /// 停止生产者并清空队列，返回被丢弃的样本数
    ///
    /// 生产者因错误退出时返回该错误
    pub fn stop(&mut self) -> Result<usize> {
        match self.state {
            PipelineState::Stopped => return Ok(0),
            PipelineState::Idle => {
                self.tx = None;
                self.state = PipelineState::Stopped;
                return Ok(0);
            }
            PipelineState::Running | PipelineState::Stopping => {}
        }

        self.request_stop();

        // 生产者可能阻塞在已满的队列上，持续取出直到它退出并关闭队列
        let mut num_drained = 0;
        while self.rx.recv().is_ok() {
            num_drained += 1;
        }

        let result = match self.producer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format_err!("producer thread panicked"))
                .and_then(|result| result),
            None => Ok(()),
        };
        self.state = PipelineState::Stopped;
        info!("pipeline stopped, {} buffered samples dropped", num_drained);

        result.map(|()| num_drained)
    }

    /// 阻塞取出 batch_size 个样本组成一批
    ///
    /// 返回的布尔值表示这一批是否包含某个 epoch 的最后一个样本
    pub fn get_next_batch(&self, batch_size: usize) -> Result<(Batch, bool)> {
        ensure!(batch_size > 0, "batch size must be positive");
        ensure!(
            matches!(self.state, PipelineState::Running | PipelineState::Stopping),
            "cannot fetch batches in {:?} state",
            self.state
        );

        let sampling = &self.config.sampling;
        let num_points = sampling.num_points.get();
        let mut batch = Batch::zeros(
            batch_size,
            num_points,
            sampling.image_height as usize,
            sampling.image_width as usize,
        );
        let mut is_last_batch = false;

        for index in 0..batch_size {
            let Message { sample, epoch_end } = self
                .rx
                .recv()
                .map_err(|_| format_err!("the producer has exited, call stop() for its result"))?;
            is_last_batch |= epoch_end;

            let choice = self.choose_points(sample.pointcloud.len(), num_points)?;
            batch
                .set(index, &sample, &choice)
                .with_context(|| format!("failed to batch sample {}", sample.id))?;
        }

        Ok((batch, is_last_batch))
    }

    /// 点数足够时不放回抽样，否则有放回抽样
    fn choose_points(&self, num_available: usize, num_points: usize) -> Result<Vec<usize>> {
        ensure!(num_available > 0, "cannot resample an empty point cloud");
        let mut rng = self
            .consumer_rng
            .lock()
            .map_err(|_| format_err!("resampling rng is poisoned"))?;

        let choice = if num_available >= num_points {
            rand::seq::index::sample(&mut *rng, num_available, num_points).into_vec()
        } else {
            let uniform = Uniform::new(0, num_available);
            (0..num_points).map(|_| uniform.sample(&mut *rng)).collect()
        };
        Ok(choice)
    }
}

impl<P> Drop for TrainingStream<P>
where
    P: FrameProvider,
{
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("producer exited with error: {:#}", err);
        }
    }
}

struct Producer<P>
where
    P: FrameProvider,
{
    config: Arc<Config>,
    provider: Arc<P>,
    frame_ids: Vec<String>,
    sampler: FrameSampler,
    rng: StdRng,
    ids: SampleIdCounter,
    stop_flag: Arc<AtomicBool>,
    tx: flume::Sender<Message>,
    augment: bool,
}

impl<P> Producer<P>
where
    P: FrameProvider,
{
    fn run(mut self) -> Result<()> {
        let result = self.produce();
        if let Err(err) = &result {
            error!("producer stopped: {:#}", err);
        }
        result
    }

    fn produce(&mut self) -> Result<()> {
        let mut epoch = 0usize;

        loop {
            // 最近的一个样本暂不发送，直到确定它是否为本 epoch 的最后一个
            let mut pending: Option<Sample> = None;
            let mut num_samples = 0usize;
            let mut num_labeled_frames = 0usize;

            for index in 0..self.frame_ids.len() {
                if self.stop_flag.load(Ordering::SeqCst) {
                    debug!("producer received stop request in epoch {}", epoch);
                    return Ok(());
                }

                let frame_id = self.frame_ids[index].clone();
                let (samples, has_labels) = self.sample_frame(&frame_id)?;
                num_samples += samples.len();
                num_labeled_frames += has_labels as usize;

                for sample in samples {
                    if let Some(prev) = pending.replace(sample) {
                        if !self.send(prev, false) {
                            return Ok(());
                        }
                    }
                }
            }

            match pending.take() {
                Some(last) => {
                    if !self.send(last, true) {
                        return Ok(());
                    }
                }
                // 标注不随 epoch 变化，没有可用标注时永远不会产生样本
                None if num_labeled_frames == 0 => {
                    bail!(
                        "none of the {} frames has labels of the selected types and difficulties",
                        self.frame_ids.len()
                    );
                }
                None => {
                    warn!(
                        "epoch {} produced no samples from {} labeled frames",
                        epoch, num_labeled_frames
                    );
                }
            }

            info!("epoch {} finished with {} samples", epoch, num_samples);
            epoch += 1;
            self.frame_ids.shuffle(&mut self.rng);
        }
    }

    /// 返回 (样本, 帧内是否有可用标注)
    fn sample_frame(&mut self, frame_id: &str) -> Result<(Vec<Sample>, bool)> {
        let mut frame = Frame::load(
            self.provider.as_ref(),
            frame_id,
            self.config.dataset.fov_clip_distance,
        )?;
        if self.augment {
            let transform = SceneTransform::random(&self.config.augmentation, &mut self.rng)?;
            transform.apply_frame(&mut frame);
        }
        let has_labels = self.sampler.has_qualifying_labels(&frame);
        let samples = self.sampler.sample_frame(&frame, &mut self.rng, &mut self.ids);
        Ok((samples, has_labels))
    }

    /// 消费端已关闭时返回 false
    fn send(&self, sample: Sample, epoch_end: bool) -> bool {
        self.tx.send(Message { sample, epoch_end }).is_ok()
    }
}
