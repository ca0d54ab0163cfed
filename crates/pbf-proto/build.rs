fn main() {
    println!("cargo:rerun-if-changed=proto/fileformat.proto");
    println!("cargo:rerun-if-changed=proto/osmformat.proto");

    prost_build::Config::new()
        .compile_protos(
            &["proto/fileformat.proto", "proto/osmformat.proto"],
            &["proto/"],
        )
        .expect("failed to compile OSM-PBF protobuf schema");
}
