//! Binary entrypoint for `hps-server`.

mod app;
mod ingress;
mod network;

fn main() {
    if let Err(err) = app::run() {
        eprintln!("failed to start hps-server: {err}");
        std::process::exit(1);
    }
}
