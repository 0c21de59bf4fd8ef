use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let doc = pod_disruptor::api::openapi::ApiDoc::openapi();
    let json = serde_json::to_string_pretty(&doc)?;
    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&path, json)?;
    println!("Wrote {}", path);
    Ok(())
}
