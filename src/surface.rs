/// Non-blocking warning sink.
pub trait Notifier: Send + Sync {
    fn warn(&self, title: &str, message: &str);
}

/// Whatever draws the tray menu and the pod detail view.
pub trait UiSurface: Send + Sync {
    /// Store or session state changed; redraw from fresh snapshots.
    fn refresh(&self);

    fn close_detail_view(&self, pod: &str);
}
