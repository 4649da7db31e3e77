//! Demo plugin `ping`

fn main() -> anyhow::Result<()> {
    plexus_runtime::launch(plexus_demo::Probe::default)
}
