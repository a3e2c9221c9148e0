pub mod cron;
pub mod server;
pub mod telegram;

use tokio::task::JoinHandle;

use crate::{prelude::*, state::AppState};

const RESTART_DELAY: Duration = Duration::from_secs(5);
const MAX_RESTART_DELAY: Duration = Duration::from_secs(300);

/// Long-running service supervised by [`App`].
#[async_trait]
pub trait Plugin: Send + Sync {
  fn name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }

  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct App {
  plugins: Vec<Arc<dyn Plugin>>,
}

impl App {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<P: Plugin + 'static>(mut self, plugin: P) -> Self {
    self.plugins.push(Arc::new(plugin));
    self
  }

  /// Spawns every plugin and restarts the ones that stop, with a growing
  /// delay between consecutive crashes.
  pub fn run(self, app: Arc<AppState>) -> Vec<JoinHandle<()>> {
    self
      .plugins
      .into_iter()
      .map(|plugin| {
        let app = app.clone();
        tokio::spawn(supervise(plugin, app))
      })
      .collect()
  }
}

async fn supervise(plugin: Arc<dyn Plugin>, app: Arc<AppState>) {
  let name = plugin.name();
  let mut delay = RESTART_DELAY;
  info!("SYSTEM: Service `{name}` initialized");

  loop {
    let started = time::Instant::now();
    let handle = tokio::spawn({
      let (app, plugin) = (app.clone(), plugin.clone());
      async move { plugin.start(app).await }
    });

    match handle.await {
      Ok(Ok(())) => warn!("Service `{name}` stopped unexpectedly (Ok)."),
      Ok(Err(err)) => error!("Service `{name}` crashed with error: {err:#}."),
      Err(join_err) if join_err.is_cancelled() => {
        info!("Service `{name}` shutdown.");
        break;
      }
      Err(_) => error!("Service `{name}` PANICKED!"),
    }

    // a service that ran for a while earns a fresh backoff
    if started.elapsed() > MAX_RESTART_DELAY {
      delay = RESTART_DELAY;
    }
    time::sleep(delay).await;
    delay = (delay * 2).min(MAX_RESTART_DELAY);
    info!("SYSTEM: Restarting service `{name}`...");
  }
}
