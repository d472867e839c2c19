use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::transcode::{FfmpegTranscoder, inspect_flac};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use serde_json::Value;

use crate::common::{
    Backend, SpawnOptions, StubTranscoder, TEST_STATEMENT_TIMEOUT_SECS, TestApp, routes, wav_tone,
};

mod health {
    use super::*;

    #[tokio::test]
    async fn root_reports_ok() {
        let app = TestApp::spawn().await;

        let res = app.get(routes::HEALTH).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["ok"], Value::Bool(true));
    }

    #[tokio::test]
    async fn openapi_document_lists_audio_routes() {
        let app = TestApp::spawn().await;

        let res = app.get(routes::OPENAPI).await;

        assert_eq!(res.status, 200);
        let paths = res.body["paths"].as_object().unwrap();
        for path in [
            "/",
            "/upload-audio",
            "/list-audios",
            "/download-audio/{id}",
            "/delete-audio/{id}",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
    }
}

mod upload {
    use super::*;

    #[tokio::test]
    async fn upload_returns_receipt() {
        let app = TestApp::spawn().await;

        let res = app.upload("tone.wav", wav_tone(2.0)).await;

        assert_eq!(res.status, 201, "{}", res.text);
        let id = res.id();
        assert_eq!(res.body["status"], "uploaded");
        assert_eq!(res.body["original_filename"], "tone.wav");
        assert_eq!(res.body["file_url"], routes::download(id).as_str());

        let stored_name = res.body["stored_name"].as_str().unwrap();
        assert_eq!(stored_name.len(), 41);
        assert!(stored_name.ends_with(".flac"));

        let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(
            res.body["created_at"].as_str().unwrap(),
        )
        .unwrap()
        .with_timezone(&Utc);
        let skew = (Utc::now() - created_at).num_milliseconds().abs();
        assert!(skew <= 1000, "created_at is {skew} ms from wall clock");
    }

    #[tokio::test]
    async fn metadata_describes_original_and_canonical_file() {
        let app = TestApp::spawn().await;
        let wav = wav_tone(2.0);
        let expected_size = StubTranscoder::expected_output(&wav).len() as u64;

        let res = app.upload_form("take 1.wav", wav.clone(), Some("alice")).await;
        assert_eq!(res.status, 201, "{}", res.text);

        let list = app.list(&[]).await;
        assert_eq!(list.status, 200);
        let item = &list.body[0];
        assert_eq!(item["file_name"], "take 1.wav");

        let metadata = &item["metadata"];
        assert_eq!(metadata["original_filename"], "take 1.wav");
        assert_eq!(metadata["original_extension"], "wav");
        assert_eq!(metadata["uploaded_by"], "alice");
        assert_eq!(metadata["original_size"].as_u64(), Some(wav.len() as u64));
        assert_eq!(metadata["canonical_format"], "flac");
        assert_eq!(metadata["size"].as_u64(), Some(expected_size));
        assert_eq!(metadata["sample_rate"].as_u64(), Some(16_000));
        assert_eq!(metadata["channels"].as_u64(), Some(1));
        assert_eq!(metadata["duration_ms"].as_u64(), Some(2000));
        assert_eq!(metadata["content_sha256"].as_str().map(str::len), Some(64));
    }

    #[tokio::test]
    async fn blank_uploader_defaults_to_api() {
        let app = TestApp::spawn().await;

        let res = app.upload_form("a.wav", wav_tone(0.2), Some("   ")).await;
        assert_eq!(res.status, 201);

        let list = app.list(&[]).await;
        assert_eq!(list.body[0]["metadata"]["uploaded_by"], "api");
    }

    #[tokio::test]
    async fn missing_file_field_is_rejected() {
        let app = TestApp::spawn().await;

        let form = reqwest::multipart::Form::new().text("uploaded_by", "bob");
        let res = app
            .client
            .post(format!("http://{}{}", app.addr, routes::UPLOAD))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let res = crate::common::TestResponse::from_response(res).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
        assert_eq!(app.record_count().await, 0);
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.upload("silence.wav", Vec::new()).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
        assert_eq!(app.record_count().await, 0);
    }

    #[tokio::test]
    async fn path_in_filename_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.upload("../escape.wav", wav_tone(0.2)).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn undecodable_input_is_unsupported() {
        let app = TestApp::spawn().await;

        let res = app
            .upload("notes.wav", b"this is plain text, not audio".to_vec())
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "UNSUPPORTED_FORMAT");
        assert_eq!(app.record_count().await, 0);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let app = TestApp::spawn_with(SpawnOptions {
            max_upload_size: Some(1024),
            ..Default::default()
        })
        .await;

        let res = app.upload("long.wav", wav_tone(0.5)).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
        assert_eq!(app.record_count().await, 0);
    }
}

mod download {
    use super::*;

    #[tokio::test]
    async fn download_streams_canonical_bytes() {
        let app = TestApp::spawn().await;
        let wav = wav_tone(1.0);
        let id = app.upload("voice memo.m4a", wav.clone()).await.id();

        let res = app.download(id, None).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, StubTranscoder::expected_output(&wav));
        assert_eq!(res.header("content-type"), Some("audio/flac"));
        let disposition = res.header("content-disposition").unwrap();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("voice%20memo.flac"), "{disposition}");
        assert_eq!(
            res.header("content-length"),
            Some(res.bytes.len().to_string().as_str())
        );
        assert!(res.header("etag").is_some());
    }

    #[tokio::test]
    async fn matching_etag_returns_not_modified() {
        let app = TestApp::spawn().await;
        let id = app.upload_tone("tone.wav", 0.5).await;

        let first = app.download(id, None).await;
        let etag = first.header("etag").unwrap().to_string();

        let second = app.download(id, Some(&etag)).await;
        assert_eq!(second.status, 304);
        assert!(second.bytes.is_empty());

        let stale = app.download(id, Some("\"deadbeef\"")).await;
        assert_eq!(stale.status, 200);

        let listed = format!("\"deadbeef\", W/{etag}");
        assert_eq!(app.download(id, Some(&listed)).await.status, 304);
        assert_eq!(app.download(id, Some("*")).await.status, 304);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app.download(999_999, None).await;

        assert_eq!(res.status, 404);
        let body: Value = serde_json::from_slice(&res.bytes).unwrap();
        assert_eq!(body["code"], "NOT_FOUND");
    }
}

mod list {
    use super::*;

    async fn seeded() -> (TestApp, i64, i64, i64) {
        let app = TestApp::spawn().await;
        let winter = app.upload_tone("winter.wav", 0.1).await;
        let summer = app.upload_tone("summer.wav", 0.1).await;
        let later = app.upload_tone("later.wav", 0.1).await;
        app.set_created_at(winter, "2024-01-01T00:00:00Z").await;
        app.set_created_at(summer, "2024-06-01T12:00:00Z").await;
        app.set_created_at(later, "2025-01-01T00:00:00Z").await;
        (app, winter, summer, later)
    }

    fn ids(body: &Value) -> Vec<i64> {
        body.as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn newest_first_without_bounds() {
        let (app, winter, summer, later) = seeded().await;

        let res = app.list(&[]).await;

        assert_eq!(res.status, 200);
        assert_eq!(ids(&res.body), vec![later, summer, winter]);
    }

    #[tokio::test]
    async fn utc_bounds_are_inclusive() {
        let (app, _, summer, _) = seeded().await;

        let res = app
            .list(&[
                ("start_time", "2024-06-01T12:00:00Z"),
                ("end_time", "2024-06-01T12:00:00Z"),
            ])
            .await;

        assert_eq!(res.status, 200);
        assert_eq!(ids(&res.body), vec![summer]);
    }

    #[tokio::test]
    async fn bounds_equal_to_server_timestamp_include_the_record() {
        let app = TestApp::spawn().await;
        let earlier = app.upload_tone("earlier.wav", 0.1).await;
        let res = app.upload("exact.wav", wav_tone(0.1)).await;
        assert_eq!(res.status, 201);
        let exact = res.id();
        let created_at = res.body["created_at"].as_str().unwrap().to_string();

        let both = app
            .list(&[("start_time", created_at.as_str()), ("end_time", created_at.as_str())])
            .await;
        assert_eq!(both.status, 200);
        assert_eq!(ids(&both.body), vec![exact]);

        let up_to = app.list(&[("end_time", created_at.as_str())]).await;
        assert_eq!(ids(&up_to.body), vec![exact, earlier]);
    }

    #[tokio::test]
    async fn offset_bounds_are_normalized() {
        let (app, _, summer, later) = seeded().await;

        // 17:30 at +05:30 is 12:00 UTC.
        let res = app
            .list(&[("start_time", "2024-06-01T17:30:00+05:30")])
            .await;

        assert_eq!(res.status, 200);
        assert_eq!(ids(&res.body), vec![later, summer]);
    }

    #[tokio::test]
    async fn naive_bounds_are_utc() {
        let (app, winter, summer, _) = seeded().await;

        let res = app.list(&[("end_time", "2024-06-01T12:00:00")]).await;
        assert_eq!(ids(&res.body), vec![summer, winter]);

        let res = app.list(&[("start_time", "2024-03-01")]).await;
        assert_eq!(res.body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let (app, ..) = seeded().await;

        let res = app
            .list(&[("start_time", "2025-01-01"), ("end_time", "2024-01-01")])
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unparsable_bound_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.list(&[("start_time", "last tuesday")]).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
        assert!(res.body["message"].as_str().unwrap().contains("start_time"));
    }

    #[tokio::test]
    async fn empty_range_returns_empty_list() {
        let (app, ..) = seeded().await;

        let res = app
            .list(&[("start_time", "2030-01-01"), ("end_time", "2030-12-31")])
            .await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body, Value::Array(Vec::new()));
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn delete_removes_record_and_payload() {
        let app = TestApp::spawn().await;
        let id = app.upload_tone("tone.wav", 0.2).await;

        let res = app.delete(&routes::delete(id)).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["status"], "deleted");
        assert_eq!(res.body["id"].as_i64(), Some(id));
        assert_eq!(app.download(id, None).await.status, 404);
        assert_eq!(app.list(&[]).await.body, Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn deleting_twice_is_not_found() {
        let app = TestApp::spawn().await;
        let id = app.upload_tone("tone.wav", 0.2).await;

        assert_eq!(app.delete(&routes::delete(id)).await.status, 200);
        let again = app.delete(&routes::delete(id)).await;

        assert_eq!(again.status, 404);
        assert_eq!(again.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn unrelated_records_survive() {
        let app = TestApp::spawn().await;
        let keep = app.upload_tone("keep.wav", 0.2).await;
        let drop = app.upload_tone("drop.wav", 0.2).await;

        app.delete(&routes::delete(drop)).await;

        let list = app.list(&[]).await;
        assert_eq!(list.body.as_array().unwrap().len(), 1);
        assert_eq!(list.body[0]["id"].as_i64(), Some(keep));
        assert_eq!(app.download(keep, None).await.status, 200);
    }
}

mod filesystem_backend {
    use super::*;

    fn filesystem() -> SpawnOptions {
        SpawnOptions {
            backend: Backend::Filesystem,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn payload_lands_on_disk_and_is_served() {
        let app = TestApp::spawn_with(filesystem()).await;
        let wav = wav_tone(0.5);

        let res = app.upload("disk.wav", wav.clone()).await;
        assert_eq!(res.status, 201, "{}", res.text);
        let stored_name = res.body["stored_name"].as_str().unwrap().to_string();

        assert_eq!(app.stored_blobs(), vec![stored_name]);
        let download = app.download(res.id(), None).await;
        assert_eq!(download.status, 200);
        assert_eq!(download.bytes, StubTranscoder::expected_output(&wav));
    }

    #[tokio::test]
    async fn delete_removes_file_from_disk() {
        let app = TestApp::spawn_with(filesystem()).await;
        let id = app.upload_tone("disk.wav", 0.2).await;
        assert_eq!(app.stored_blobs().len(), 1);

        assert_eq!(app.delete(&routes::delete(id)).await.status, 200);

        assert!(app.stored_blobs().is_empty());
    }

    #[tokio::test]
    async fn missing_payload_is_not_found() {
        let app = TestApp::spawn_with(filesystem()).await;
        let res = app.upload("disk.wav", wav_tone(0.2)).await;
        let stored_name = res.body["stored_name"].as_str().unwrap();
        let dir = app.blob_dir.as_ref().unwrap().path().join("audios");
        std::fs::remove_file(dir.join(stored_name)).unwrap();

        let download = app.download(res.id(), None).await;

        assert_eq!(download.status, 404);
    }

    #[tokio::test]
    async fn failed_insert_removes_written_blob() {
        let app = TestApp::spawn_with(SpawnOptions {
            backend: Backend::Filesystem,
            failing_inserts: true,
            ..Default::default()
        })
        .await;

        let res = app.upload("doomed.wav", wav_tone(0.2)).await;

        assert_eq!(res.status, 500);
        assert_eq!(res.code(), "STORAGE_ERROR");
        assert!(!res.text.contains("injected"));
        assert!(app.stored_blobs().is_empty());
        assert_eq!(app.record_count().await, 0);
    }
}

mod database {
    use super::*;

    #[tokio::test]
    async fn runaway_statement_is_cancelled() {
        let app = TestApp::spawn().await;

        let started = Instant::now();
        let result = app
            .db
            .execute_raw(Statement::from_string(
                DbBackend::Postgres,
                "SELECT pg_sleep(30)".to_string(),
            ))
            .await;
        let elapsed = started.elapsed();

        let err = result.unwrap_err().to_string();
        assert!(err.contains("statement timeout"), "{err}");
        let bound = Duration::from_secs(TEST_STATEMENT_TIMEOUT_SECS as u64);
        assert!(elapsed < bound + Duration::from_secs(3), "took {elapsed:?}");
    }
}

mod ffmpeg {
    use super::*;

    #[tokio::test]
    async fn real_transcode_round_trip() {
        let transcoder = FfmpegTranscoder::new("ffmpeg", Duration::from_secs(60));
        if let Err(e) = transcoder.probe().await {
            eprintln!("skipping: {e}");
            return;
        }
        let app = TestApp::spawn_with(SpawnOptions {
            transcoder: Arc::new(transcoder),
            ..Default::default()
        })
        .await;

        let id = app.upload_tone("tone.wav", 2.0).await;
        let download = app.download(id, None).await;

        assert_eq!(download.status, 200);
        assert_eq!(&download.bytes[..4], b"fLaC");
        let info = inspect_flac(&download.bytes).unwrap();
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.channels, 1);
        assert!((1950..=2050).contains(&info.duration_ms), "{}", info.duration_ms);
    }
}
