fn main() -> anyhow::Result<()> {
    review_roster::main()
}
