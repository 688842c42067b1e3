//! The "Upside Down" instruction template.

/// Scene used when the user gives no instruction.
const DEFAULT_SCENARIO: &str = "SCENE: The character is trapped in a dark, vine-covered version \
of a real-world location, looking terrified or heroic.";

const PREAMBLE: &str = "\
You are a visual effects concept artist for Stranger Things.

TASK: Re-imagine the subject from the provided reference image inside the \"Upside Down\".

IMAGE USAGE INSTRUCTIONS (CRITICAL):
- **IDENTITY REFERENCE ONLY**: Use the provided image to capture the character's physical appearance (face, hair, build, clothing style).
- **BREAK THE POSE**: Do NOT strictly adhere to the original photo's pose, camera angle, or composition. You MUST re-stage the shot to make it cinematic.
- **DYNAMIC SCENE**: The character should be interacting with the environment (e.g., looking around in fear, running, hiding, or investigating).
- **INTEGRATION**: Blend the character naturally into the lighting and atmosphere. Their clothes should look distressed, dirty, or wet to match the environment.

THEME: THE UPSIDE DOWN
- **ATMOSPHERE**: Thick, volumetric blue/grey fog. The air must be filled with floating white spore particles (ash-like snow).
- **ENVIRONMENT**: The world is decayed and abandoned. Structures are covered in massive, twisting organic vines (nether-tentacles) and biological sludge.
- **LIGHTING**: Cinematic low-key lighting. Cold cyan ambient light punctuated by fierce RED lightning storms or glowing red rifts in the distance.
- **VIBE**: 1980s retro-horror, film grain, high contrast.";

const OUTPUT_REQUIREMENTS: &str = "\
OUTPUT REQUIREMENTS:
- Photorealistic 8k resolution.
- Cinematic aspect ratio and depth of field.
- NO TEXT, NO LOGOS, NO WATERMARKS.";

/// Builds the full instruction sent with every request in a batch.
///
/// Blank user text selects the default scenario.
pub fn compose(user_instruction: &str) -> String {
    let user_instruction = user_instruction.trim();
    let scenario = if user_instruction.is_empty() {
        DEFAULT_SCENARIO.to_string()
    } else {
        format!(
            "SPECIFIC ACTION: \"{user_instruction}\". Prioritize this action over the original image context."
        )
    };

    format!("{PREAMBLE}\n\nUSER SCENARIO:\n{scenario}\n\n{OUTPUT_REQUIREMENTS}")
}
