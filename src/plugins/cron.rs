use crate::{plugins::Plugin, prelude::*, state::AppState};

/// Drives the subscription sweep: a warm-up delay after start, then one
/// sweep per configured interval.
pub struct Sweeper;

#[async_trait]
impl Plugin for Sweeper {
  fn name(&self) -> &'static str {
    "sweeper"
  }

  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    time::sleep(app.config.sweep_warmup).await;

    let mut interval = time::interval(app.config.sweep_interval);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
      interval.tick().await;

      let now = Utc::now().naive_utc();
      match app.sv().sweeper.run(now).await {
        Ok(report) if report == Default::default() => {
          debug!("Sweep finished, nothing to do");
        }
        Ok(report) => info!(
          "Sweep finished: {} reminded, {} expired, {} failed",
          report.reminded, report.expired, report.failed
        ),
        Err(err) => error!("Sweep aborted: {err}"),
      }
    }
  }
}
