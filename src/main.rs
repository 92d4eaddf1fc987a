fn main() -> anyhow::Result<()> {
    uranium::driver::main()
}
