//! DetectionLoop: periodic capture -> multi-scale match -> gate -> dispatch.
//!
//! One loop is one tokio task that owns its template, its trigger gate and its
//! capture handle. Nothing is shared with other loops. The only ways in from
//! the outside are the stop flag (a `watch` channel) and the published
//! `LoopState`; the only way out is the `EventSink`.

use crate::debug_if_enabled;
use crate::error::{Result, WatchError};
use crate::events::{EventRecord, KeyCombo, Outcome, Phase};
use crate::services::capture::{Region, ScreenCapturer};
use crate::services::dispatcher::ActionDispatcher;
use crate::services::event_sink::EventSink;
use crate::services::matcher::{MatchResult, ScaleSet, TemplateMatcher};
use crate::services::trigger_gate::{GateState, TriggerGate};
use parking_lot::RwLock;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Полностью разрешённые параметры одного цикла. Неизменны после запуска.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub name: String,
    pub template_path: PathBuf,
    /// `None` означает весь основной дисплей
    pub region: Option<Region>,
    pub combo: KeyCombo,
    pub threshold: f64,
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub scales: ScaleSet,
    pub capture_backoff: Duration,
    pub match_backoff: Duration,
    pub min_template_size: u32,
    pub focus_window: Option<String>,
    pub once: bool,
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return WatchError::config("Имя стратегии не может быть пустым");
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return WatchError::config(format!("[{}] Порог должен быть в (0, 1]: {}", self.name, self.threshold));
        }
        if let Some(region) = &self.region {
            region.validate()?;
        }
        if self.min_template_size == 0 {
            return WatchError::config(format!("[{}] min_template_size должен быть не меньше 1", self.name));
        }
        Ok(())
    }
}

/// CREATED -> RUNNING -> STOPPING -> STOPPED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoopState::Created => "CREATED",
            LoopState::Running => "RUNNING",
            LoopState::Stopping => "STOPPING",
            LoopState::Stopped => "STOPPED",
        };
        write!(f, "{}", label)
    }
}

/// Счётчики одного запуска
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub polls: u64,
    pub triggered: u64,
    pub suppressed: u64,
    pub capture_failures: u64,
    pub match_failures: u64,
    pub dispatch_failures: u64,
    pub final_gate: GateState,
}

impl Default for LoopSummary {
    fn default() -> Self {
        Self {
            polls: 0,
            triggered: 0,
            suppressed: 0,
            capture_failures: 0,
            match_failures: 0,
            dispatch_failures: 0,
            final_gate: GateState::Armed,
        }
    }
}

/// Чем закончилась итерация: от этого зависит пауза перед следующей
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Idle,
    Fired,
    CaptureFailed,
    MatchFailed,
}

pub struct DetectionLoop {
    config: DetectionConfig,
    matcher: Arc<TemplateMatcher>,
    capturer: Arc<dyn ScreenCapturer>,
    dispatcher: Arc<dyn ActionDispatcher>,
    sink: Arc<dyn EventSink>,
    gate: TriggerGate,
    state: Arc<RwLock<LoopState>>,
    summary: LoopSummary,
}

impl DetectionLoop {
    /// Загрузить шаблон и подготовить цикл. Ошибки здесь только конфигурационные.
    pub fn new(
        config: DetectionConfig,
        capturer: Arc<dyn ScreenCapturer>,
        dispatcher: Arc<dyn ActionDispatcher>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let matcher = TemplateMatcher::from_path(
            &config.template_path,
            &config.scales,
            config.threshold,
            config.min_template_size,
        )?;
        Self::with_matcher(config, matcher, capturer, dispatcher, sink)
    }

    pub fn with_matcher(
        config: DetectionConfig,
        matcher: TemplateMatcher,
        capturer: Arc<dyn ScreenCapturer>,
        dispatcher: Arc<dyn ActionDispatcher>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "[{}] Цикл создан: шаблон {:?}, масштабы {:?}, порог {}, комбинация {}",
            config.name,
            matcher.original_size(),
            matcher.active_scales(),
            config.threshold,
            config.combo
        );

        Ok(Self {
            gate: TriggerGate::new(config.cooldown),
            config,
            matcher: Arc::new(matcher),
            capturer,
            dispatcher,
            sink,
            state: Arc::new(RwLock::new(LoopState::Created)),
            summary: LoopSummary::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// CREATED -> RUNNING: запустить цикл в отдельной задаче tokio
    pub fn start(self) -> LoopHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let name = self.config.name.clone();

        *state.write() = LoopState::Running;
        let task = tokio::spawn(self.run(stop_rx));

        LoopHandle {
            name,
            stop_tx,
            state,
            task: Some(task),
        }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) -> LoopSummary {
        let region = self
            .config
            .region
            .map(|r| r.to_string())
            .unwrap_or_else(|| "весь экран".to_string());
        self.emit(EventRecord::started(
            &self.config.name,
            format!(
                "Мониторинг запущен: шаблон {:?}, регион {}, порог {}, комбинация {}",
                self.config.template_path, region, self.config.threshold, self.config.combo
            ),
        ));

        loop {
            if stop_requested(&stop) {
                break;
            }

            let outcome = self.poll_once().await;
            let delay = match outcome {
                PollOutcome::Fired if self.config.once => {
                    info!("[{}] Режим --once: остановка после первого срабатывания", self.config.name);
                    break;
                }
                PollOutcome::Idle | PollOutcome::Fired => self.config.poll_interval,
                PollOutcome::CaptureFailed => self.config.capture_backoff,
                PollOutcome::MatchFailed => self.config.match_backoff,
            };

            if !sleep_or_stop(&mut stop, delay).await {
                break;
            }
        }

        *self.state.write() = LoopState::Stopping;
        self.summary.final_gate = self.gate.state(Instant::now());
        let summary = self.summary;
        self.emit(EventRecord::stopped(
            &self.config.name,
            format!(
                "Мониторинг остановлен: опросов {}, срабатываний {}, подавлено {}",
                summary.polls, summary.triggered, summary.suppressed
            ),
        ));
        *self.state.write() = LoopState::Stopped;
        summary
    }

    /// Одна итерация: захват, сопоставление, решение гейта, отправка
    async fn poll_once(&mut self) -> PollOutcome {
        self.summary.polls += 1;

        let frame = match self.capturer.capture(self.config.region).await {
            Ok(frame) => frame,
            Err(e) => {
                self.summary.capture_failures += 1;
                self.emit(EventRecord::failed(&self.config.name, Phase::Capture, e.to_string()));
                return PollOutcome::CaptureFailed;
            }
        };

        let matcher = Arc::clone(&self.matcher);
        let result = tokio::task::spawn_blocking(move || matcher.find(&frame))
            .await
            .map_err(|e| WatchError::MatchComputation(format!("Задача сопоставления прервана: {}", e)))
            .and_then(|r| r);

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.summary.match_failures += 1;
                self.emit(EventRecord::failed(&self.config.name, Phase::Matching, e.to_string()));
                return PollOutcome::MatchFailed;
            }
        };

        debug_if_enabled!("[{}] Опрос #{}: {} found={}", self.config.name, self.summary.polls, result, result.found);

        if !result.found {
            return PollOutcome::Idle;
        }

        let now = Instant::now();
        if !self.gate.should_fire(&result, now) {
            self.summary.suppressed += 1;
            let remaining = self.gate.remaining(now);
            self.emit(EventRecord::new(
                &self.config.name,
                Phase::Detection,
                Outcome::Suppressed,
                format!("Сигнал найден ({}), остывание ещё {:.1}с", result, remaining.as_secs_f64()),
            ));
            return PollOutcome::Idle;
        }

        self.fire(&result, now).await;
        PollOutcome::Fired
    }

    async fn fire(&mut self, result: &MatchResult, now: Instant) {
        self.summary.triggered += 1;
        self.emit(EventRecord::new(
            &self.config.name,
            Phase::Detection,
            Outcome::Triggered,
            format!("Сигнал найден ({}), отправка {}", result, self.config.combo),
        ));

        if let Some(hint) = &self.config.focus_window {
            if !self.dispatcher.focus_window(hint).await {
                warn!("[{}] Окно '{}' не сфокусировано, отправляем без фокуса", self.config.name, hint);
                self.emit(EventRecord::failed(
                    &self.config.name,
                    Phase::Focus,
                    format!("Окно '{}' не сфокусировано", hint),
                ));
            }
        }

        if let Err(e) = self.dispatcher.dispatch(&self.config.combo).await {
            self.summary.dispatch_failures += 1;
            self.emit(EventRecord::failed(
                &self.config.name,
                Phase::Dispatch,
                format!("Комбинация {} не отправлена: {}", self.config.combo, e),
            ));
        }

        // Остывание считается от попытки, даже неудачной
        self.gate.on_fired(now);
    }

    fn emit(&self, record: EventRecord) {
        self.sink.emit(record);
    }
}

/// Управление запущенным циклом. Удаление хэндла равносильно `stop()`.
pub struct LoopHandle {
    name: String,
    stop_tx: watch::Sender<bool>,
    state: Arc<RwLock<LoopState>>,
    task: Option<JoinHandle<LoopSummary>>,
}

impl LoopHandle {
    pub fn state(&self) -> LoopState {
        *self.state.read()
    }

    /// RUNNING -> STOPPING. Повторные вызовы ничего не делают.
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state == LoopState::Running {
                *state = LoopState::Stopping;
                info!("[{}] Запрошена остановка", self.name);
            }
        }
        self.stop_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Дождаться завершения задачи цикла
    pub async fn join(mut self) -> Result<LoopSummary> {
        let Some(task) = self.task.take() else {
            return Err(WatchError::Internal(format!("[{}] Цикл уже ожидался", self.name)));
        };
        task.await
            .map_err(|e| WatchError::Internal(format!("[{}] Задача цикла завершилась аварийно: {}", self.name, e)))
    }

    /// Остановить и дождаться не дольше `timeout`
    pub async fn shutdown(self, timeout: Duration) -> Result<LoopSummary> {
        self.stop();
        let name = self.name.clone();
        tokio::time::timeout(timeout, self.join())
            .await
            .map_err(|_| WatchError::Internal(format!("[{}] Цикл не остановился за {:?}", name, timeout)))?
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

/// Прерываемая пауза. `false`, если за время паузы пришёл сигнал остановки.
async fn sleep_or_stop(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if stop_requested(stop) {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = stop.changed() => return false,
    }
    !stop_requested(stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::capture::tests::ScriptedCapturer;
    use crate::services::capture::Frame;
    use crate::services::dispatcher::tests::RecordingDispatcher;
    use crate::services::event_sink::tests::MemorySink;
    use crate::services::matcher::tests::noise;
    use crate::watch_error;

    const SIGNAL_SEED: u32 = 1;

    fn signal_frame() -> Frame {
        noise(64, 48, SIGNAL_SEED)
    }

    fn empty_frame(seed: u32) -> Frame {
        noise(64, 48, 1000 + seed)
    }

    fn matcher() -> TemplateMatcher {
        let template = image::imageops::crop_imm(&signal_frame(), 20, 10, 16, 16).to_image();
        TemplateMatcher::new(template, &ScaleSet::new(vec![1.0]).unwrap(), 0.85, 8).unwrap()
    }

    fn config() -> DetectionConfig {
        DetectionConfig {
            name: "buy".to_string(),
            template_path: PathBuf::from("buy.png"),
            region: None,
            combo: "ctrl+alt+1".parse().unwrap(),
            threshold: 0.85,
            poll_interval: Duration::from_millis(10),
            cooldown: Duration::from_secs(3),
            scales: ScaleSet::new(vec![1.0]).unwrap(),
            capture_backoff: Duration::from_millis(10),
            match_backoff: Duration::from_millis(10),
            min_template_size: 8,
            focus_window: None,
            once: false,
        }
    }

    struct Fixture {
        dispatcher: Arc<RecordingDispatcher>,
        sink: Arc<MemorySink>,
    }

    fn build(config: DetectionConfig, capturer: ScriptedCapturer, dispatcher: RecordingDispatcher) -> (DetectionLoop, Fixture) {
        let dispatcher = Arc::new(dispatcher);
        let sink = Arc::new(MemorySink::new());
        let detection = DetectionLoop::with_matcher(
            config,
            matcher(),
            Arc::new(capturer),
            dispatcher.clone(),
            sink.clone(),
        )
        .unwrap();
        (detection, Fixture { dispatcher, sink })
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("условие не выполнено за 5 секунд");
    }

    #[tokio::test]
    async fn test_frame_stream_triggers_once_after_fourth_frame() {
        let frames = vec![Ok(empty_frame(1)), Ok(empty_frame(2)), Ok(empty_frame(3)), Ok(signal_frame())];
        let capturer = ScriptedCapturer::repeating(frames, empty_frame(4));
        let (detection, fx) = build(config(), capturer, RecordingDispatcher::new());

        let handle = detection.start();
        wait_until(|| fx.dispatcher.dispatch_count() == 1).await;
        let summary = handle.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(fx.dispatcher.dispatch_count(), 1);
        assert_eq!(summary.triggered, 1);
        assert!(summary.polls >= 4);
        assert_eq!(summary.final_gate, GateState::Cooling);

        // Первые три опроса ничего не нашли
        let records = fx.sink.records();
        let first_found = records.iter().position(|r| r.is_found()).unwrap();
        assert_eq!(records[first_found].outcome, Outcome::Triggered);
        assert_eq!(fx.sink.count(Phase::Detection, Outcome::Triggered), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_matches_dispatch_once() {
        let frames = vec![Ok(signal_frame()), Ok(signal_frame())];
        let capturer = ScriptedCapturer::repeating(frames, empty_frame(1));
        let (detection, fx) = build(config(), capturer, RecordingDispatcher::new());

        let handle = detection.start();
        wait_until(|| fx.sink.count(Phase::Detection, Outcome::Suppressed) == 1).await;
        let summary = handle.shutdown(Duration::from_secs(2)).await.unwrap();

        let found: Vec<_> = fx.sink.records().into_iter().filter(|r| r.is_found()).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].outcome, Outcome::Triggered);
        assert_eq!(found[1].outcome, Outcome::Suppressed);
        assert_eq!(fx.dispatcher.dispatch_count(), 1);
        assert_eq!(summary.suppressed, 1);
    }

    #[tokio::test]
    async fn test_once_halts_after_first_trigger() {
        let mut cfg = config();
        cfg.once = true;
        cfg.cooldown = Duration::ZERO;
        let capturer = ScriptedCapturer::repeating(vec![Ok(empty_frame(1))], signal_frame());
        let (detection, fx) = build(cfg, capturer, RecordingDispatcher::new());

        let handle = detection.start();
        let summary = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.triggered, 1);
        assert_eq!(summary.polls, 2);
        assert_eq!(fx.dispatcher.dispatch_count(), 1);
        assert_eq!(fx.sink.records().last().unwrap().phase, Phase::Stop);
    }

    #[tokio::test]
    async fn test_stop_mid_sleep_is_not_delayed_by_poll_interval() {
        let mut cfg = config();
        cfg.poll_interval = Duration::from_secs(10);
        let capturer = ScriptedCapturer::repeating(vec![], empty_frame(1));
        let (detection, fx) = build(cfg, capturer, RecordingDispatcher::new());

        let handle = detection.start();
        assert_eq!(handle.state(), LoopState::Running);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        handle.stop();
        handle.stop();
        assert_eq!(handle.state(), LoopState::Stopping);

        let summary = handle.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(summary.polls, 1);
        assert_eq!(fx.sink.count(Phase::Stop, Outcome::Stopped), 1);
    }

    #[tokio::test]
    async fn test_state_reaches_stopped() {
        let capturer = ScriptedCapturer::repeating(vec![], empty_frame(1));
        let (detection, _fx) = build(config(), capturer, RecordingDispatcher::new());
        let state = Arc::clone(&detection.state);
        assert_eq!(*state.read(), LoopState::Created);

        let handle = detection.start();
        handle.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(*state.read(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_capture_failures_back_off_and_recover() {
        let frames = vec![
            Err(watch_error!(capture, "дисплей недоступен")),
            Err(watch_error!(capture, "дисплей недоступен")),
            Ok(signal_frame()),
        ];
        let capturer = ScriptedCapturer::repeating(frames, empty_frame(1));
        let (detection, fx) = build(config(), capturer, RecordingDispatcher::new());

        let handle = detection.start();
        wait_until(|| fx.dispatcher.dispatch_count() == 1).await;
        let summary = handle.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(summary.capture_failures, 2);
        assert_eq!(fx.sink.count(Phase::Capture, Outcome::Failed), 2);
        assert_eq!(summary.triggered, 1);
    }

    #[tokio::test]
    async fn test_empty_frame_is_reported_as_match_failure() {
        let frames = vec![Ok(Frame::new(0, 0)), Ok(signal_frame())];
        let capturer = ScriptedCapturer::repeating(frames, empty_frame(1));
        let (detection, fx) = build(config(), capturer, RecordingDispatcher::new());

        let handle = detection.start();
        wait_until(|| fx.dispatcher.dispatch_count() == 1).await;
        let summary = handle.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(summary.match_failures, 1);
        assert_eq!(fx.sink.count(Phase::Matching, Outcome::Failed), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_logged_and_cooldown_still_applies() {
        let capturer = ScriptedCapturer::repeating(vec![], signal_frame());
        let (detection, fx) = build(config(), capturer, RecordingDispatcher::failing());

        let handle = detection.start();
        wait_until(|| fx.sink.count(Phase::Detection, Outcome::Suppressed) >= 2).await;
        assert_eq!(handle.state(), LoopState::Running);
        let summary = handle.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(fx.dispatcher.dispatch_count(), 1);
        assert_eq!(summary.dispatch_failures, 1);
        assert_eq!(fx.sink.count(Phase::Dispatch, Outcome::Failed), 1);
    }

    #[tokio::test]
    async fn test_focus_precedes_dispatch_when_configured() {
        let mut cfg = config();
        cfg.focus_window = Some("Terminal".to_string());
        cfg.once = true;
        let capturer = ScriptedCapturer::repeating(vec![], signal_frame());
        let (detection, fx) = build(cfg, capturer, RecordingDispatcher::new());

        detection.start().join().await.unwrap();
        assert_eq!(*fx.dispatcher.focused.lock(), vec!["Terminal".to_string()]);
        assert_eq!(fx.dispatcher.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn test_focus_failure_is_recorded_and_dispatch_goes_ahead() {
        let mut cfg = config();
        cfg.focus_window = Some("Chart".to_string());
        cfg.once = true;
        let capturer = ScriptedCapturer::repeating(vec![], signal_frame());
        let (detection, fx) = build(cfg, capturer, RecordingDispatcher::unfocusable());

        detection.start().join().await.unwrap();
        assert_eq!(fx.dispatcher.dispatch_count(), 1);
        assert_eq!(fx.sink.count(Phase::Focus, Outcome::Failed), 1);
        assert_eq!(fx.sink.count(Phase::Dispatch, Outcome::Failed), 0);

        let phases: Vec<Phase> = fx.sink.records().iter().map(|r| r.phase).collect();
        let focus = phases.iter().position(|p| *p == Phase::Focus).unwrap();
        let triggered = phases.iter().position(|p| *p == Phase::Detection).unwrap();
        assert!(triggered < focus);
    }

    #[tokio::test]
    async fn test_start_and_stop_events_bracket_the_run() {
        let capturer = ScriptedCapturer::repeating(vec![], empty_frame(1));
        let (detection, fx) = build(config(), capturer, RecordingDispatcher::new());

        let handle = detection.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown(Duration::from_secs(2)).await.unwrap();

        let records = fx.sink.records();
        assert_eq!(records.first().unwrap().outcome, Outcome::Started);
        assert_eq!(records.last().unwrap().outcome, Outcome::Stopped);
        assert!(records.iter().all(|r| r.category == "buy"));
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_loop() {
        let capturer = ScriptedCapturer::repeating(vec![], empty_frame(1));
        let (detection, fx) = build(config(), capturer, RecordingDispatcher::new());

        drop(detection.start());
        wait_until(|| fx.sink.count(Phase::Stop, Outcome::Stopped) == 1).await;
    }

    #[test]
    fn test_invalid_config_refuses_to_build() {
        let mut cfg = config();
        cfg.threshold = 0.0;
        assert!(cfg.validate().unwrap_err().is_configuration());

        let mut cfg = config();
        cfg.name = " ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.template_path = PathBuf::from("/nonexistent/signal.png");
        let result = DetectionLoop::new(
            cfg,
            Arc::new(ScriptedCapturer::new(vec![])),
            Arc::new(RecordingDispatcher::new()),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(WatchError::TemplateLoad { .. })));
    }
}
