use super::connection::EventConnection;

/// A feature plugged into every client session.
///
/// The connector calls [`on_session_start`](Self::on_session_start) and
/// [`register_subscriptions`](Self::register_subscriptions) on each new
/// connection before it starts pumping, and
/// [`on_disconnect`](Self::on_disconnect) after it ends.
pub trait FeatureHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_session_start(&self) {}

    fn register_subscriptions(&self, conn: &mut EventConnection);

    fn on_disconnect(&self);
}
