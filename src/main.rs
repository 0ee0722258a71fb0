use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use polygon_pong_server::config::{GameSettings, ServerConfig};
use polygon_pong_server::game::state::GameId;
use polygon_pong_server::lobby::manager::GameRegistry;
use polygon_pong_server::metrics::{self, Metrics};
use polygon_pong_server::net::game_session::UpdateScheduler;
use polygon_pong_server::net::memory::{ChannelPublisher, MemoryLock, MemoryStore};
use polygon_pong_server::net::protocol::{encode_json, BoardSnapshot, ClientMessage, ServerMessage};
use polygon_pong_server::util::vec2::Vec2;

type Registry = GameRegistry<MemoryStore, MemoryLock, ChannelPublisher>;

/// How far off the ball a demo paddle may aim, as a fraction of its side
const DEMO_AIM_ERROR: f64 = 0.25;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Polygon Pong Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {} Hz, max_games={}, demo_games={} ({} with {} sides)",
        config.tick_rate,
        config.max_games,
        config.demo_games,
        config.demo_mode.as_str(),
        config.demo_sides
    );

    let metrics = Arc::new(Metrics::new());
    if config.metrics_port != 0 {
        let metrics_clone = metrics.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let publisher = Arc::new(ChannelPublisher::new());
    let scheduler = UpdateScheduler::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLock::new()),
        publisher.clone(),
        metrics.clone(),
        config.tick_rate,
    );
    let registry = Arc::new(GameRegistry::new(scheduler, config.max_games));

    for _ in 0..config.demo_games {
        start_demo_game(&registry, &publisher, &config).await?;
    }
    info!("Server ready, {} games running", registry.game_count());

    let idle = async {
        while registry.game_count() > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        }
        _ = idle => {
            info!("All games finished");
        }
    }

    registry.shutdown_all().await;
    if publisher.channel_count() > 0 {
        warn!("{} game channels still open after shutdown", publisher.channel_count());
    }
    info!("{}", metrics.to_json());
    info!("Server stopped");

    Ok(())
}

/// Create a game and seat self-playing paddles at every player side
async fn start_demo_game(
    registry: &Arc<Registry>,
    publisher: &Arc<ChannelPublisher>,
    config: &ServerConfig,
) -> anyhow::Result<GameId> {
    let mut settings = GameSettings {
        game_mode: config.demo_mode,
        num_sides: config.demo_sides,
        ..Default::default()
    };
    let paddles = (settings.effective_sides() / 2).max(2);
    settings.num_paddles = paddles;
    settings.min_players = paddles;
    settings.max_players = paddles;

    let game_id = registry.create_game(settings)?;
    let messages = publisher.subscribe(game_id);

    let mut players = Vec::with_capacity(paddles);
    for _ in 0..paddles {
        let player_id = Uuid::new_v4();
        let seat = registry.join_game(game_id, player_id).await?;
        players.push((player_id, seat.side));
    }

    tokio::spawn(run_demo_players(registry.clone(), game_id, players, messages));
    Ok(game_id)
}

/// Steer every demo paddle towards the ball, with some aiming error
async fn run_demo_players(
    registry: Arc<Registry>,
    game_id: GameId,
    players: Vec<(Uuid, usize)>,
    mut messages: tokio::sync::broadcast::Receiver<ServerMessage>,
) {
    let mut board: Option<BoardSnapshot> = None;

    loop {
        let message = match messages.recv().await {
            Ok(message) => message,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                debug!("Demo players of game {} skipped {} messages", game_id, n);
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        match message {
            ServerMessage::Board(snapshot) => board = Some(snapshot),
            ServerMessage::StateUpdate(snapshot) => {
                let (Some(board), Some(ball)) = (&board, snapshot.balls.first()) else {
                    continue;
                };
                for &(player_id, side) in &players {
                    let aim = side_projection(board, side, ball.position)
                        + rand::thread_rng().gen_range(-DEMO_AIM_ERROR..DEMO_AIM_ERROR);
                    let move_paddle = ClientMessage::MovePaddle { position: aim };
                    if let Err(e) = registry.handle_client_message(player_id, move_paddle).await {
                        debug!("Demo move in game {} rejected: {}", game_id, e);
                    }
                }
            }
            ServerMessage::Collision(event) => {
                if let Ok(json) = encode_json(&event) {
                    debug!("Game {}: {}", game_id, json);
                }
            }
            ServerMessage::Error { kind, message } => {
                warn!("Game {} reported {:?}: {}", game_id, kind, message);
            }
            ServerMessage::GameOver { reason, result } => {
                let standings: Vec<String> = result
                    .rankings
                    .iter()
                    .map(|r| format!("#{} paddle {} ({})", r.rank, r.paddle, r.score))
                    .collect();
                info!(
                    "Demo game {} over ({:?}) after {:.1}s: winner {:?}, {}",
                    game_id,
                    reason,
                    result.match_duration,
                    result.winner,
                    standings.join(", ")
                );
                break;
            }
        }
    }
}

/// Relative position of a point projected onto a side
fn side_projection(board: &BoardSnapshot, side: usize, point: Vec2) -> f64 {
    let n = board.vertices.len();
    if n == 0 {
        return 0.5;
    }
    let a = board.vertices[side % n];
    let b = board.vertices[(side + 1) % n];
    let edge = b - a;
    let length_sq = edge.length_sq();
    if length_sq <= f64::EPSILON {
        return 0.5;
    }
    ((point - a).dot(edge) / length_sq).clamp(0.0, 1.0)
}
