use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rocket::data::{Data, ToByteUnit};
use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{get, post, routes, FromForm, Responder, State};
use serde::{Deserialize, Serialize};

use quickdrop::expiry::spawn_expiry_sweeper;
use quickdrop::registry::{RegistryConfig, TransferRegistry};
use quickdrop::staging::DiskStaging;
use quickdrop::{ChunkUpload, TransferError, TransferId};

const MAX_CHUNK_MEBIBYTES: u64 = 256;

#[derive(Parser, Debug)]
#[command(name = "api_server", about = "Ephemeral one-shot file transfer server")]
struct Args {
    #[arg(long, default_value_t = 8000)]
    port: u16,
    /// Scratch directory for staged chunks and reassembled files.
    #[arg(long, default_value = "./uploads")]
    upload_dir: String,
    /// Transfer lifetime in seconds.
    #[arg(long, default_value_t = 3600)]
    ttl_secs: u64,
    /// Allow a transfer to be downloaded more than once.
    #[arg(long)]
    multi_use: bool,
}

struct AppState {
    registry: Arc<TransferRegistry>,
}

#[derive(Deserialize)]
struct CreateRequest {
    file_count: u32,
    total_size: u64,
}

#[derive(Serialize)]
struct CreateResponse {
    success: bool,
    transfer_id: String,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
}

#[derive(Serialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Serialize)]
struct FileInfo {
    name: String,
    size: u64,
}

#[derive(Serialize)]
struct ListResponse {
    success: bool,
    files: Vec<FileInfo>,
    total_size: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

type ApiError = (Status, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(err: TransferError) -> ApiError {
    let status = match &err {
        TransferError::NotFound(_) => Status::NotFound,
        TransferError::AlreadyDownloaded(_) => Status::Gone,
        TransferError::InvalidInput(_) => Status::BadRequest,
        _ => Status::InternalServerError,
    };
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: err.to_string(),
        }),
    )
}

fn parse_id(raw: &str) -> Result<TransferId, ApiError> {
    raw.parse()
        .map_err(|_| api_error(TransferError::InvalidInput(format!("malformed transfer id: {raw}"))))
}

#[get("/")]
fn index() -> &'static str {
    "quickdrop transfer server"
}

#[post("/api/transfers", data = "<req>")]
async fn create_transfer(state: &State<AppState>, req: Json<CreateRequest>) -> ApiResult<CreateResponse> {
    let id = state
        .registry
        .create_transfer(req.file_count, req.total_size)
        .await
        .map_err(api_error)?;
    Ok(Json(CreateResponse {
        success: true,
        transfer_id: id.to_string(),
    }))
}

#[derive(FromForm)]
struct ChunkMeta {
    file_id: String,
    file_name: String,
    file_index: u32,
    file_size: u64,
    chunk_index: usize,
    total_chunks: usize,
}

#[post("/api/transfers/<id>/chunks?<meta..>", data = "<chunk>")]
async fn upload_chunk(
    state: &State<AppState>,
    id: &str,
    meta: ChunkMeta,
    chunk: Data<'_>,
) -> ApiResult<UploadResponse> {
    let id = parse_id(id)?;
    let upload = ChunkUpload::new(
        meta.file_id,
        meta.file_name,
        meta.file_index,
        meta.file_size,
        meta.chunk_index,
        meta.total_chunks,
    )
    .map_err(api_error)?;

    let payload = chunk
        .open(MAX_CHUNK_MEBIBYTES.mebibytes())
        .into_bytes()
        .await
        .map_err(|e| api_error(TransferError::Io(e)))?
        .into_inner();

    state
        .registry
        .record_chunk(&id, upload, &payload)
        .await
        .map_err(api_error)?;
    Ok(Json(UploadResponse { success: true }))
}

#[get("/api/transfers/<id>")]
async fn check_transfer(state: &State<AppState>, id: &str) -> Json<ExistsResponse> {
    let exists = match id.parse::<TransferId>() {
        Ok(id) => state.registry.exists(&id).await,
        Err(_) => false,
    };
    Json(ExistsResponse { exists })
}

#[get("/api/transfers/<id>/files")]
async fn list_files(state: &State<AppState>, id: &str) -> ApiResult<ListResponse> {
    let id = parse_id(id)?;
    let listing = state.registry.list_files(&id).await.map_err(api_error)?;
    Ok(Json(ListResponse {
        success: true,
        files: listing
            .files
            .into_iter()
            .map(|f| FileInfo {
                name: f.name,
                size: f.size,
            })
            .collect(),
        total_size: listing.declared_total_size,
    }))
}

#[derive(Responder)]
#[response(content_type = "application/zip")]
struct ArchiveResponse {
    bytes: Vec<u8>,
    disposition: Header<'static>,
}

#[get("/api/transfers/<id>/download")]
async fn download(state: &State<AppState>, id: &str) -> Result<ArchiveResponse, ApiError> {
    let id = parse_id(id)?;
    let archive = state.registry.download_archive(&id).await.map_err(api_error)?;
    Ok(ArchiveResponse {
        bytes: archive.bytes,
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", archive.file_name),
        ),
    })
}

#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let staging = Arc::new(
        DiskStaging::new(&args.upload_dir)
            .await
            .expect("failed to prepare upload directory"),
    );
    let config = RegistryConfig {
        ttl: Duration::from_secs(args.ttl_secs),
        single_shot: !args.multi_use,
    };
    let registry = Arc::new(TransferRegistry::new(staging, config));
    let _sweeper = spawn_expiry_sweeper(Arc::clone(&registry), Duration::from_secs(5));

    let figment = rocket::Config::figment().merge(("port", args.port));
    rocket::custom(figment)
        .manage(AppState { registry })
        .mount(
            "/",
            routes![
                index,
                create_transfer,
                upload_chunk,
                check_transfer,
                list_files,
                download
            ],
        )
        .launch()
        .await?;
    Ok(())
}
