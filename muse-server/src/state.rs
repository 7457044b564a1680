use muse::Muse;

#[derive(Clone)]
pub struct AppState {
    pub muse: Muse,
}
