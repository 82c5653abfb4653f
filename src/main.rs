use anyhow::Context;

fn main() -> anyhow::Result<()> {
    taskvault::run().context("taskvault failed")
}
