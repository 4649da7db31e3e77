//! Demo plugin `pong`; the same probe as `ping` under another name

fn main() -> anyhow::Result<()> {
    plexus_runtime::launch(plexus_demo::Probe::default)
}
