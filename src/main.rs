fn main() -> anyhow::Result<()> {
    qillqay_lib::run()
}
