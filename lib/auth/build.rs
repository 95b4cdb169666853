fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()?;
        // SAFETY: build scripts run single-threaded.
        unsafe { std::env::set_var("PROTOC", protoc) };
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .type_attribute(".flyteidl.service", "#[derive(serde::Serialize)]")
        .compile_protos(&["proto/auth.proto"], &["proto/"])?;
    Ok(())
}
