//! Manifest builder tests over a synthetic dataset tree

use hf2data::config::ManifestConfig;
use hf2data::manifest::{
    build_manifest, read_manifest, row_id, sha256_string, write_manifest, Emotion, Provenance,
};
use hf2data::{Config, DatasetPipeline};
use std::fs;
use std::path::Path;

/// Write `data/raw/audio/<stem>.wav` and `data/raw/midi/<stem>.mid` with
/// distinct contents
fn add_pair(root: &Path, audio_stem: &str, midi_stem: &str) {
    add_file(root, &format!("data/raw/audio/{}.wav", audio_stem));
    add_file(root, &format!("data/raw/midi/{}.mid", midi_stem));
}

fn add_file(root: &Path, relpath: &str) {
    let path = root.join(relpath);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, format!("content of {}", relpath)).unwrap();
}

/// A dataset with every naming convention and a couple of defects
fn sample_dataset(root: &Path) {
    for emotion in ["angry", "happy", "sad", "tender", "original1"] {
        let stem = format!("Solmoy_{}", emotion);
        add_pair(root, &stem, &stem);
    }
    for emotion in ["angry", "happy", "sad", "original"] {
        let stem = format!("Haslebuskane_{}", emotion);
        add_pair(root, &stem, &stem);
    }
    add_pair(root, "00106-Furholt Otto-Fiskaren", "00106-Furholt Otto-Fiskaren");
    add_pair(
        root,
        "Baggen_happy_torr_02-Dec-2024_cleaned",
        "Baggen_happy_torr_02-Dec-2024",
    );
    add_file(root, "data/raw/audio/Lonely_sad.wav");
    add_file(root, "data/raw/midi/Ghost.mid");
    add_file(root, "data/raw/audio/Dup.wav");
    add_file(root, "data/raw/audio/Dup_cleaned.wav");
    add_file(root, "data/raw/midi/Dup.mid");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());

        let report = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();
        assert_eq!(report.rows.len(), 11);

        let audio: Vec<&str> = report.rows.iter().map(|r| r.audio_relpath.as_str()).collect();
        let mut sorted = audio.clone();
        sorted.sort();
        assert_eq!(audio, sorted);

        let archival = report
            .rows
            .iter()
            .find(|r| r.song_name == "00106-Furholt Otto-Fiskaren")
            .unwrap();
        assert_eq!(archival.notes, Some(Provenance::Archival));
        assert_eq!(archival.emotion, None);
        assert_eq!(archival.audio_ext, ".wav");
        assert_eq!(archival.midi_ext, ".mid");

        let processed = report.rows.iter().find(|r| r.song_name == "Baggen").unwrap();
        assert_eq!(processed.notes, Some(Provenance::Processed));
        assert_eq!(processed.emotion, Some(Emotion::Happy));
        assert_eq!(
            processed.midi_relpath,
            "data/raw/midi/Baggen_happy_torr_02-Dec-2024.mid"
        );
        assert_eq!(
            processed.audio_sha256,
            sha256_string("content of data/raw/audio/Baggen_happy_torr_02-Dec-2024_cleaned.wav")
        );
    }

    #[test]
    fn test_unpaired_and_ambiguous_files_excluded() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());

        let report = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();
        assert_eq!(report.orphan_audio, vec!["data/raw/audio/Lonely_sad.wav"]);
        assert_eq!(report.orphan_midi, vec!["data/raw/midi/Ghost.mid"]);
        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].key, "Dup");
        assert_eq!(report.ambiguous[0].files.len(), 3);
        assert!(report.rows.iter().all(|r| !r.audio_relpath.contains("Dup")));
    }

    #[test]
    fn test_variation_completeness() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());

        let report = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();

        let solmoy: Vec<_> = report.rows.iter().filter(|r| r.song_name == "Solmoy").collect();
        assert_eq!(solmoy.len(), 5);
        assert!(solmoy.iter().all(|r| r.has_emotional_variations));
        assert!(solmoy.iter().any(|r| r.emotion == Some(Emotion::Original)));

        // A lone expressive take is reported like four of five
        assert_eq!(report.incomplete_variations.len(), 2);
        let single = &report.incomplete_variations[0];
        assert_eq!(single.song_name, "Baggen");
        assert_eq!(single.present, vec![Emotion::Happy]);
        assert_eq!(
            single.missing,
            vec![Emotion::Angry, Emotion::Sad, Emotion::Tender, Emotion::Original]
        );
        let incomplete = &report.incomplete_variations[1];
        assert_eq!(incomplete.song_name, "Haslebuskane");
        assert_eq!(incomplete.missing, vec![Emotion::Tender]);
        assert!(report
            .rows
            .iter()
            .filter(|r| r.song_name == "Haslebuskane")
            .all(|r| !r.has_emotional_variations));

        assert_eq!(report.songs_with_variations(), 1);
    }

    #[test]
    fn test_only_sad_take_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        add_pair(dir.path(), "Toingen_sad", "Toingen_sad");

        let report = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert!(!report.rows[0].has_emotional_variations);
        assert_eq!(report.incomplete_variations.len(), 1);
        assert_eq!(report.incomplete_variations[0].song_name, "Toingen");
        assert_eq!(report.incomplete_variations[0].missing.len(), 4);
    }

    #[test]
    fn test_listed_song_reported_without_expressive_takes() {
        let dir = tempfile::tempdir().unwrap();
        add_pair(dir.path(), "Vossarull_original", "Vossarull_original");
        add_pair(dir.path(), "Bruremarsj_original", "Bruremarsj_original");

        let report = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();
        let names: Vec<&str> = report
            .incomplete_variations
            .iter()
            .map(|s| s.song_name.as_str())
            .collect();
        assert_eq!(names, vec!["Vossarull"]);

        let config = ManifestConfig {
            songs_with_variations: vec!["Bruremarsj".to_string()],
            ..ManifestConfig::default()
        };
        let report = build_manifest(dir.path(), &config).unwrap();
        assert_eq!(report.incomplete_variations[0].song_name, "Bruremarsj");
        assert_eq!(report.incomplete_variations.len(), 1);
    }

    #[test]
    fn test_ids_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());

        let first = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();
        let second = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();
        assert_eq!(first.rows, second.rows);

        for row in &first.rows {
            assert_eq!(row.id, row_id(&row.audio_relpath, &row.midi_relpath));
            assert_eq!(
                row.id,
                sha256_string(&format!("{}:{}", row.audio_relpath, row.midi_relpath))
            );
        }
    }

    #[test]
    fn test_id_ignores_file_content() {
        let dir = tempfile::tempdir().unwrap();
        add_pair(dir.path(), "Solmoy_sad", "Solmoy_sad");
        let before = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();

        fs::write(dir.path().join("data/raw/audio/Solmoy_sad.wav"), b"re-recorded").unwrap();
        let after = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();

        assert_eq!(before.rows[0].id, after.rows[0].id);
        assert_ne!(before.rows[0].audio_sha256, after.rows[0].audio_sha256);
    }

    #[test]
    fn test_pipeline_writes_manifest_atomically() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());

        let pipeline = DatasetPipeline::new(Config::default());
        let path = pipeline.manifest_path(dir.path());
        let report = pipeline.build_manifest(dir.path(), &path).unwrap();

        assert!(path.ends_with("data/manifests/manifest.csv"));
        let rows = read_manifest(&path).unwrap();
        assert_eq!(rows, report.rows);

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_manifest_csv_format() {
        let dir = tempfile::tempdir().unwrap();
        add_pair(dir.path(), "Solmoy_sad", "Solmoy_sad");
        let report = build_manifest(dir.path(), &ManifestConfig::default()).unwrap();
        let path = dir.path().join("manifest.csv");
        write_manifest(&report.rows, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,song_name,audio_relpath,midi_relpath,audio_sha256,midi_sha256,audio_ext,midi_ext,has_emotional_variations,emotion,notes"
        );
        let fields: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(fields[1], "Solmoy");
        assert_eq!(fields[2], "data/raw/audio/Solmoy_sad.wav");
        assert_eq!(fields[8], "False");
        assert_eq!(fields[9], "sad");
        assert_eq!(fields[10], "");
    }

    #[test]
    fn test_missing_audio_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_manifest(dir.path(), &ManifestConfig::default()).is_err());
    }
}
