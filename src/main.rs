use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use proximity_chat::{
    AppState, config::Config, delivery::HttpCourier, monitor::InactivityMonitor,
    offline::connect_broker, routes,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 连接消息代理，启动时连不上直接退出
    let broker = connect_broker(&config.broker_url).expect("Invalid broker URL");
    let courier = Arc::new(
        HttpCourier::new(config.delivery_timeout()).expect("Failed to build HTTP client"),
    );
    let state = AppState::build(config.clone(), broker, courier)
        .await
        .expect("Failed to connect to offline message broker");
    tracing::info!("Offline message store ready at {}", config.broker_url);

    // 后台清理不活跃用户
    let monitor = InactivityMonitor::new(
        state.registry.clone(),
        config.inactivity_timeout(),
        config.sweep_interval(),
    );
    let _sweeper = monitor.spawn();
    tracing::info!(
        "Inactivity monitor running every {}s with {}s timeout",
        config.sweep_interval_secs,
        config.inactivity_timeout_secs
    );

    let router = routes::router(state);

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = router.layer(tower_http::cors::CorsLayer::permissive());

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service(),
    )
    .await
    .expect("Failed to start server");
}
