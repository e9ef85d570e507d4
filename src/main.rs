use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::{CliOverrides, Config, LoggingConfig};
use services::{
    create_dispatcher, save_region, ChannelEventSink, DetectionLoop, EventSink, Region, ScaleSet, ScreenCapturer,
    StatusBoard, StrategySupervisor, XcapCapturer,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "signal-watcher")]
#[command(about = "Отслеживание сигнала на экране по шаблону и отправка комбинации клавиш")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "signal-watcher.toml", global = true)]
    config: PathBuf,

    /// Режим сухого запуска (комбинации только логируются)
    #[arg(long, global = true)]
    dry_run: bool,

    /// Уровень логирования (перекрывает logging.level)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Шаблон сигнала: запустить одну стратегию из флагов вместо [[strategies]]
    #[arg(long)]
    template: Option<PathBuf>,

    /// Имя стратегии из флагов
    #[arg(long)]
    name: Option<String>,

    /// Порог совпадения в (0, 1]
    #[arg(long)]
    threshold: Option<f64>,

    /// Пауза после срабатывания, секунды
    #[arg(long)]
    cooldown: Option<f64>,

    /// Комбинация клавиш, например ctrl+alt+1
    #[arg(long)]
    hotkey: Option<String>,

    /// Регион захвата x,y,w,h (по умолчанию весь экран)
    #[arg(long)]
    region: Option<Region>,

    /// Интервал опроса, секунды
    #[arg(long)]
    interval: Option<f64>,

    /// Масштабы шаблона через запятую, например 1.0,0.9,1.1
    #[arg(long)]
    scales: Option<ScaleSet>,

    /// Остановиться после первого срабатывания
    #[arg(long)]
    once: bool,

    /// Подстрока заголовка окна, которое фокусируется перед отправкой
    #[arg(long)]
    focus_window: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Сохранить регион экрана в файл для использования как шаблон
    Grab {
        /// Регион x,y,w,h
        #[arg(long)]
        region: Region,

        /// Путь к файлу изображения
        #[arg(long, default_value = "template.png")]
        out: PathBuf,
    },
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            log_level: self.log_level.clone(),
            template: self.template.clone(),
            name: self.name.clone(),
            threshold: self.threshold,
            cooldown: self.cooldown,
            hotkey: self.hotkey.clone(),
            region: self.region,
            interval: self.interval,
            scales: self.scales.clone(),
            once: self.once,
            focus_window: self.focus_window.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::Grab { region, out }) = &args.command {
        init_tracing(&LoggingConfig {
            level: args.log_level.clone().unwrap_or_else(|| "info".to_string()),
            format: "pretty".to_string(),
        })?;
        return grab(*region, out).await;
    }

    // Конфигурация загружается до логирования: от неё зависят уровень и формат
    let config = Config::load(&args.config, &args.overrides())?;
    init_tracing(&config.logging)?;

    info!("Запуск Signal Watcher v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {:?}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - реальные нажатия отключены");
    } else {
        // Проверка прав доступа
        utils::permissions::check_permissions()?;
    }

    // Инициализация компонентов
    let capturer: Arc<dyn ScreenCapturer> = Arc::new(XcapCapturer::new());
    let dispatcher = create_dispatcher(&config.dispatch, args.dry_run)?;

    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let status_board = StatusBoard::new();
    let board_handle = status_board.spawn(event_rx);
    let sink: Arc<dyn EventSink> = Arc::new(ChannelEventSink::new(event_tx));

    let supervisor = StrategySupervisor::new();
    for detection_config in config.detection_configs()? {
        let name = detection_config.name.clone();
        let detection = match DetectionLoop::new(detection_config, capturer.clone(), dispatcher.clone(), sink.clone()) {
            Ok(detection) => detection,
            Err(e) if e.is_configuration() => {
                return Err(e).with_context(|| format!("Стратегия '{}' не может быть запущена", name));
            }
            Err(e) => {
                error!("Стратегия '{}' пропущена: {}", name, e);
                continue;
            }
        };
        supervisor.start(detection)?;
    }
    // Канал закроется, когда циклы отпустят свои копии
    drop(sink);

    if supervisor.len() == 0 {
        anyhow::bail!("Ни одна стратегия не запущена");
    }
    for (name, state) in supervisor.states() {
        info!("Стратегия '{}': {}", name, state);
    }

    // Ожидание сигнала завершения или окончания всех циклов (--once)
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
            Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
        },
        _ = wait_all_finished(&supervisor) => {
            info!("Все стратегии завершили работу");
        }
    }

    info!("Завершение работы...");

    for (name, summary) in supervisor.stop_all(SHUTDOWN_TIMEOUT).await {
        info!(
            "[{}] опросов {}, срабатываний {}, подавлено {}, ошибок захвата/сопоставления/отправки {}/{}/{}, гейт {}",
            name,
            summary.polls,
            summary.triggered,
            summary.suppressed,
            summary.capture_failures,
            summary.match_failures,
            summary.dispatch_failures,
            summary.final_gate
        );
    }

    // Ожидаем, пока StatusBoard дочитает канал (с таймаутом)
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, board_handle).await {
        Ok(_) => status_board.log_summary(),
        Err(_) => warn!("Таймаут при завершении журнала событий"),
    }

    info!("Signal Watcher завершил работу");
    Ok(())
}

async fn wait_all_finished(supervisor: &StrategySupervisor) {
    let mut tick = tokio::time::interval(Duration::from_millis(200));
    loop {
        tick.tick().await;
        if supervisor.all_finished() {
            return;
        }
    }
}

async fn grab(region: Region, out: &std::path::Path) -> Result<()> {
    let capturer = XcapCapturer::new();
    let (width, height) = save_region(&capturer, region, out)
        .await
        .with_context(|| format!("Не удалось сохранить регион {} в {:?}", region, out))?;
    info!("Шаблон {}x{} сохранён в {:?}", width, height, out);
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }

    Ok(())
}
