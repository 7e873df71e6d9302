use anyhow::Result;
use arbor_core::Arbor;

#[derive(Debug, Clone, Copy)]
pub(super) struct WebServeOptions<'a> {
    pub(super) host: &'a str,
    pub(super) port: u16,
}

pub(super) fn serve(app: &Arbor, options: WebServeOptions<'_>) -> Result<()> {
    arbor_web::serve_web(app.clone(), options.host, options.port)
}
