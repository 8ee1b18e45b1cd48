//! Show or reset the saved sticker placement.

use stickerbatch_common::{preferences_file_path, JsonFileStore, PreferenceStore};
use stickerbatch_media_model::{StickerPlacement, POSITION_KEY, SIZE_KEY};

pub fn show(json: bool) -> anyhow::Result<()> {
    let store = JsonFileStore::open(preferences_file_path())?;
    let placement = StickerPlacement::restore(&store);

    if json {
        println!("{}", serde_json::to_string_pretty(&placement)?);
    } else {
        println!("Saved placement ({})", store.path().display());
        println!("  Position: ({}%, {}%)", placement.position.x, placement.position.y);
        println!("  Size: {}%", placement.size);
        if placement.is_near_edge() {
            println!("  [WARN] Near the edge; the sticker may not be visible");
        }
    }
    Ok(())
}

pub fn reset() -> anyhow::Result<()> {
    let mut store = JsonFileStore::open(preferences_file_path())?;
    forget(&mut store)?;
    println!("Placement reset to defaults");
    Ok(())
}

fn forget(store: &mut dyn PreferenceStore) -> anyhow::Result<()> {
    store.remove(POSITION_KEY)?;
    store.remove(SIZE_KEY)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forget_restores_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        StickerPlacement::new(95.0, 10.0, 40.0)
            .persist(&mut store)
            .unwrap();
        forget(&mut store).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(StickerPlacement::restore(&reopened), StickerPlacement::default());
    }
}
